use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};

use promsource_common::time::align_time;

use crate::exemplar::{sort_by_time, sort_by_value_desc, Exemplar, Sampler};

/// Keeps, per step bucket, the largest exemplar and then every exemplar at least two
/// standard deviations below the previously kept one. Mean and variance are maintained
/// over all added values with Welford's algorithm.
#[derive(Debug, Default)]
pub struct StdDevSampler {
    step: Duration,
    buckets: AHashMap<DateTime<Utc>, Vec<Exemplar>>,
    count: usize,
    mean: f64,
    m2: f64,
}

impl StdDevSampler {
    fn update_aggregations(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation, zero for fewer than two values.
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

impl Sampler for StdDevSampler {
    fn add(&mut self, exemplar: Exemplar) {
        let bucket = align_time(exemplar.timestamp, self.step, 0);
        self.update_aggregations(exemplar.value);
        self.buckets.entry(bucket).or_default().push(exemplar);
    }

    fn set_step(&mut self, step: Duration) {
        self.step = step;
    }

    fn sample(&mut self) -> Vec<Exemplar> {
        let std_dev = self.std_dev();
        let threshold = 2.0 * std_dev;
        let mut sampled = Vec::with_capacity(self.buckets.len());
        for (_, mut bucket) in self.buckets.drain() {
            sort_by_value_desc(&mut bucket);
            let mut prev: Option<f64> = None;
            for exemplar in bucket {
                let keep = match prev {
                    None => true,
                    Some(prev) => std_dev != 0.0 && prev - exemplar.value >= threshold,
                };
                if keep {
                    prev = Some(exemplar.value);
                    sampled.push(exemplar);
                }
            }
        }
        sort_by_time(&mut sampled);
        sampled
    }

    fn reset(&mut self) {
        self.step = Duration::ZERO;
        self.buckets.clear();
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}
