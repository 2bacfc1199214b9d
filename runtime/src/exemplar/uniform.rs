use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};

use promsource_common::time::align_time;

use crate::exemplar::{sort_by_time, sort_by_value_desc, Exemplar, Sampler};

/// Number of buckets the observed time span is split into when no step is set.
pub const UNIFORM_BUCKET_COUNT: u32 = 100;
/// Most exemplars kept per bucket.
pub const UNIFORM_MAX_PER_BUCKET: usize = 10;

const MIN_STEP: Duration = Duration::from_millis(1);

/// Keeps at most [UNIFORM_MAX_PER_BUCKET] exemplars per bucket, taken at an even stride
/// over the bucket sorted by value.
#[derive(Debug, Default)]
pub struct UniformSampler {
    step: Duration,
    exemplars: Vec<Exemplar>,
    min_ts: Option<DateTime<Utc>>,
    max_ts: Option<DateTime<Utc>>,
}

impl UniformSampler {
    fn bucket_step(&self) -> Duration {
        if !self.step.is_zero() {
            return self.step;
        }
        let span = match (self.min_ts, self.max_ts) {
            (Some(min), Some(max)) => (max - min).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        (span / UNIFORM_BUCKET_COUNT).max(MIN_STEP)
    }
}

impl Sampler for UniformSampler {
    fn add(&mut self, exemplar: Exemplar) {
        let ts = exemplar.timestamp;
        self.min_ts = Some(self.min_ts.map_or(ts, |min| min.min(ts)));
        self.max_ts = Some(self.max_ts.map_or(ts, |max| max.max(ts)));
        self.exemplars.push(exemplar);
    }

    fn set_step(&mut self, step: Duration) {
        self.step = step;
    }

    fn sample(&mut self) -> Vec<Exemplar> {
        let step = self.bucket_step();
        let mut buckets: AHashMap<DateTime<Utc>, Vec<Exemplar>> = AHashMap::new();
        for exemplar in self.exemplars.drain(..) {
            let bucket = align_time(exemplar.timestamp, step, 0);
            buckets.entry(bucket).or_default().push(exemplar);
        }

        let mut sampled = Vec::with_capacity(buckets.len() * UNIFORM_MAX_PER_BUCKET);
        for (_, mut bucket) in buckets {
            if bucket.len() <= UNIFORM_MAX_PER_BUCKET {
                sampled.extend(bucket);
                continue;
            }
            sort_by_value_desc(&mut bucket);
            let stride = bucket.len().div_ceil(UNIFORM_MAX_PER_BUCKET);
            sampled.extend(bucket.into_iter().step_by(stride));
        }
        sort_by_time(&mut sampled);
        sampled
    }

    fn reset(&mut self) {
        self.step = Duration::ZERO;
        self.exemplars.clear();
        self.min_ts = None;
        self.max_ts = None;
    }
}
