// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-item exponential backoff for re-queued work items.
//!
//! Each failing item waits `base * 2^failures` (capped) before it is retried, with ±10%
//! jitter so that items failing together do not retry together. A success resets the item.

use crate::constants::{
    QUEUE_BACKOFF_MULTIPLIER, QUEUE_BASE_DELAY_MILLIS, QUEUE_MAX_DELAY_SECS,
    QUEUE_RANDOMIZATION_FACTOR,
};
use rand::Rng;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial_interval: Duration,
    /// Maximum delay
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Delay before the next attempt after `failures` earlier failures.
    #[must_use]
    pub fn interval_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_interval.as_secs_f64();
        let capped = if secs.is_finite() { secs.min(max) } else { max };
        self.apply_jitter(Duration::from_secs_f64(capped))
            .min(self.max_interval)
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff used by the work queue.
///
/// # Configuration
///
/// - **Initial interval**: 5ms
/// - **Max interval**: 1000 seconds
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// The cap is reached after about 18 consecutive failures of one item.
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(QUEUE_BASE_DELAY_MILLIS),
        Duration::from_secs(QUEUE_MAX_DELAY_SECS),
        QUEUE_BACKOFF_MULTIPLIER,
        QUEUE_RANDOMIZATION_FACTOR,
    )
}

/// Counts consecutive failures per item and turns them into delays.
#[derive(Debug)]
pub struct ItemRateLimiter<T> {
    backoff: ExponentialBackoff,
    failures: HashMap<T, u32>,
}

impl<T: Eq + Hash + Clone> ItemRateLimiter<T> {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Records one more failure of `item` and returns how long to wait before retrying it.
    pub fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let delay = self.backoff.interval_for(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Forgets the failure history of `item`.
    pub fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }

    /// Number of failures recorded for `item` since it was last forgotten.
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
