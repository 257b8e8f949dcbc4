//! Retry policy for the transfer and commit steps.
//!
//! Implements exponential backoff with configurable parameters.

use crate::import::types::IngestError;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `retry_count` (0-based).
    ///
    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff`.
    /// A negative product waits zero, a NaN one waits `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry_count as i32);
        let backoff = (self.initial_backoff.as_secs_f64() * factor)
            .min(self.max_backoff.as_secs_f64());
        if backoff <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(backoff).unwrap_or(self.max_backoff)
    }

    /// Check if an error should be retried given the current retry count.
    pub fn should_retry(&self, error: &IngestError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}
