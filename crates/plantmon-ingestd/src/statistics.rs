//! Single-pass summary statistics over readings

use crate::types::Reading;
use serde::{Deserialize, Serialize};

/// Summary over an explicit set of readings.
///
/// `count == 0` with every other field `None` is the no-data result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
}

impl Statistics {
    pub const NO_DATA: Statistics = Statistics {
        count: 0,
        min: None,
        max: None,
        mean: None,
        std_dev: None,
    };

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Running sums for one traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(&self) -> Statistics {
        if self.count == 0 {
            return Statistics::NO_DATA;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        // Rounding can push E[x^2] - mean^2 slightly negative for flat series
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        Statistics {
            count: self.count,
            min: Some(self.min),
            max: Some(self.max),
            mean: Some(mean),
            std_dev: Some(variance.sqrt()),
        }
    }
}

impl Extend<f64> for Accumulator {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

/// Statistics over readings in one pass.
pub fn aggregate<'a, I>(readings: I) -> Statistics
where
    I: IntoIterator<Item = &'a Reading>,
{
    aggregate_values(readings.into_iter().map(|r| r.value))
}

pub fn aggregate_values<I>(values: I) -> Statistics
where
    I: IntoIterator<Item = f64>,
{
    let mut acc = Accumulator::new();
    acc.extend(values);
    acc.finish()
}
