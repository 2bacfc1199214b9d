use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use promsource_common::label::Labels;

pub use framer::*;
pub use label_tracker::*;
pub use noop::*;
pub use stddev::*;
pub use uniform::*;

use crate::config::SamplerKind;

mod framer;
mod label_tracker;
mod noop;
mod stddev;
mod uniform;

/// A single exemplar read from a backend exemplar result.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Labels of the series the exemplar belongs to, shared by all its exemplars.
    pub series_labels: Arc<Labels>,
    pub labels: Labels,
}

impl Exemplar {
    /// Value of label `name`, preferring the exemplar's own labels over the series labels.
    /// Missing labels yield an empty string.
    pub fn label(&self, name: &str) -> &str {
        self.labels
            .get(name)
            .or_else(|| self.series_labels.get(name))
            .map_or("", String::as_str)
    }
}

pub trait Sampler {
    fn add(&mut self, exemplar: Exemplar);
    fn set_step(&mut self, step: Duration);
    /// Returns the selected exemplars in ascending time order.
    fn sample(&mut self) -> Vec<Exemplar>;
    fn reset(&mut self);
}

/// The sampling strategies, picked once per query from the datasource settings.
#[derive(Debug)]
pub enum ExemplarSampler {
    NoOp(NoOpSampler),
    Uniform(UniformSampler),
    StdDev(StdDevSampler),
}

impl ExemplarSampler {
    pub fn new(kind: SamplerKind) -> Self {
        match kind {
            SamplerKind::None => ExemplarSampler::NoOp(NoOpSampler::default()),
            SamplerKind::Uniform => ExemplarSampler::Uniform(UniformSampler::default()),
            SamplerKind::StdDev => ExemplarSampler::StdDev(StdDevSampler::default()),
        }
    }
}

impl Sampler for ExemplarSampler {
    fn add(&mut self, exemplar: Exemplar) {
        match self {
            ExemplarSampler::NoOp(s) => s.add(exemplar),
            ExemplarSampler::Uniform(s) => s.add(exemplar),
            ExemplarSampler::StdDev(s) => s.add(exemplar),
        }
    }

    fn set_step(&mut self, step: Duration) {
        match self {
            ExemplarSampler::NoOp(s) => s.set_step(step),
            ExemplarSampler::Uniform(s) => s.set_step(step),
            ExemplarSampler::StdDev(s) => s.set_step(step),
        }
    }

    fn sample(&mut self) -> Vec<Exemplar> {
        match self {
            ExemplarSampler::NoOp(s) => s.sample(),
            ExemplarSampler::Uniform(s) => s.sample(),
            ExemplarSampler::StdDev(s) => s.sample(),
        }
    }

    fn reset(&mut self) {
        match self {
            ExemplarSampler::NoOp(s) => s.reset(),
            ExemplarSampler::Uniform(s) => s.reset(),
            ExemplarSampler::StdDev(s) => s.reset(),
        }
    }
}

pub(crate) fn sort_by_time(exemplars: &mut [Exemplar]) {
    exemplars.sort_by_key(|e| e.timestamp);
}

pub(crate) fn sort_by_value_desc(exemplars: &mut [Exemplar]) {
    exemplars.sort_by(|a, b| b.value.total_cmp(&a.value));
}
