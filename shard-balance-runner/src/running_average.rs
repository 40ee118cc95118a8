// Copyright (c) The shard-balance Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental averages of test durations.

/// A mean that is updated one observation at a time, without keeping past observations.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningAverage {
    average: Option<f64>,
    count: u64,
}

impl RunningAverage {
    /// Creates an empty running average.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes a running average from a previously computed mean over `count` observations.
    ///
    /// A count of zero produces an empty average, ignoring `average`.
    pub fn resume(average: f64, count: u64) -> Self {
        if count == 0 {
            Self::new()
        } else {
            Self {
                average: Some(average),
                count,
            }
        }
    }

    /// Adds an observation and returns the updated mean.
    pub fn observe(&mut self, value: f64) -> f64 {
        self.count += 1;
        let average = match self.average {
            None => value,
            Some(average) => average + (value - average) / self.count as f64,
        };
        self.average = Some(average);
        average
    }

    /// Returns the current mean, or `None` if nothing has been observed.
    pub fn average(&self) -> Option<f64> {
        self.average
    }

    /// Returns the number of observations so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}
