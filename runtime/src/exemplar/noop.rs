use std::time::Duration;

use crate::exemplar::{sort_by_time, Exemplar, Sampler};

/// Keeps every exemplar.
#[derive(Debug, Default)]
pub struct NoOpSampler {
    exemplars: Vec<Exemplar>,
}

impl Sampler for NoOpSampler {
    fn add(&mut self, exemplar: Exemplar) {
        self.exemplars.push(exemplar);
    }

    fn set_step(&mut self, _step: Duration) {}

    fn sample(&mut self) -> Vec<Exemplar> {
        let mut exemplars = std::mem::take(&mut self.exemplars);
        sort_by_time(&mut exemplars);
        exemplars
    }

    fn reset(&mut self) {
        self.exemplars.clear();
    }
}
