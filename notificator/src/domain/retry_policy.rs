//! Bounded exponential backoff for retryable notifier failures.

use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// How often and how patiently a failed delivery is retried.
///
/// Only failures a notifier flags as retryable are retried. The delay before
/// retry `n` is `initial_delay_ms * backoff_multiplier^n`, capped at
/// `max_delay_ms`; jitter never pushes it past the cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first delivery attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that delivers once and gives up.
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether retry number `retry` (0-indexed) may still run.
    pub fn allows_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Delay to wait before retry number `retry` (0-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let max = self.max_delay_ms as f64;
        let exp = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry.min(64) as i32);
        let capped = (if exp.is_finite() { exp.min(max) } else { max }) as u64;

        if !self.use_jitter {
            return Duration::from_millis(capped);
        }

        // Up to a quarter of the base delay, bounded by the remaining headroom.
        let limit = (capped / 4).min(self.max_delay_ms.saturating_sub(capped));
        if limit == 0 {
            return Duration::from_millis(capped);
        }
        Duration::from_millis(capped + rand::rng().random_range(0..limit))
    }
}
