//! Mergeable quantile sketch.
//!
//! Values are counted in logarithmic buckets: bucket `i` holds magnitudes
//! in `(gamma^(i-1), gamma^i]` with `gamma = (1 + a) / (1 - a)`, so any
//! reported quantile is within relative accuracy `a` of a true sample.
//! Buckets hold integer counts, so merging is associative and commutative
//! and the merge order never changes a result.

use std::collections::BTreeMap;

use tandem_common::constants::SKETCH_RELATIVE_ACCURACY;

/// Magnitudes below this are counted as zero.
const MIN_INDEXABLE: f64 = 1e-9;

/// Log-bucket quantile sketch.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileSketch {
    gamma: f64,
    ln_gamma: f64,
    positive: BTreeMap<i32, u64>,
    negative: BTreeMap<i32, u64>,
    zeros: u64,
    count: u64,
    min: f64,
    max: f64,
}

impl QuantileSketch {
    /// Creates a sketch with the given relative accuracy.
    #[must_use]
    pub fn new(relative_accuracy: f64) -> Self {
        let accuracy = relative_accuracy.clamp(1e-6, 0.5);
        let gamma = (1.0 + accuracy) / (1.0 - accuracy);
        Self {
            gamma,
            ln_gamma: gamma.ln(),
            positive: BTreeMap::new(),
            negative: BTreeMap::new(),
            zeros: 0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn index(&self, magnitude: f64) -> i32 {
        (magnitude.ln() / self.ln_gamma).ceil() as i32
    }

    fn bucket_value(&self, index: i32) -> f64 {
        2.0 * self.gamma.powi(index) / (self.gamma + 1.0)
    }

    /// Adds a value. NaN is ignored.
    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        if value.abs() < MIN_INDEXABLE {
            self.zeros += 1;
        } else if value > 0.0 {
            *self.positive.entry(self.index(value)).or_default() += 1;
        } else {
            *self.negative.entry(self.index(-value)).or_default() += 1;
        }
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Folds `other` into this sketch.
    pub fn merge(&mut self, other: &Self) {
        for (index, count) in &other.positive {
            *self.positive.entry(*index).or_default() += count;
        }
        for (index, count) in &other.negative {
            *self.negative.entry(*index).or_default() += count;
        }
        self.zeros += other.zeros;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns the number of values added.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns true if no value was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Estimates the `q`-quantile, `q` in `[0, 1]`.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        if q == 0.0 {
            return Some(self.min);
        }
        if q == 1.0 {
            return Some(self.max);
        }

        let rank = (q * (self.count - 1) as f64).floor() as u64;
        let mut seen = 0u64;
        for (index, count) in self.negative.iter().rev() {
            seen += count;
            if seen > rank {
                return Some((-self.bucket_value(*index)).clamp(self.min, self.max));
            }
        }
        seen += self.zeros;
        if seen > rank {
            return Some(0.0);
        }
        for (index, count) in &self.positive {
            seen += count;
            if seen > rank {
                return Some(self.bucket_value(*index).clamp(self.min, self.max));
            }
        }
        Some(self.max)
    }
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new(SKETCH_RELATIVE_ACCURACY)
    }
}
