//! Bounded exponential backoff for transient coordination-store failures
//!
//! The policy only covers connectivity failures. Waiting on a contended lock
//! is not a retry and never consumes attempts.

use std::time::Duration;

use rand::Rng;

/// Largest shift applied to the backoff multiplier
const MAX_BACKOFF_SHIFT: u32 = 29;

/// Retry configuration for store calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base backoff unit
    pub initial_delay: Duration,
    /// Upper bound for a single sleep
    pub max_delay: Duration,
    /// Retry ceiling (the first attempt is not counted)
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(3000),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            max_retries,
            ..Default::default()
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another attempt is allowed after `retries` retries have been made
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Sleep before retry number `retry` (0-indexed).
    ///
    /// The delay is `initial_delay * r` with `r` drawn from `[1, 2^(retry+1))`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let shift = (retry + 1).min(MAX_BACKOFF_SHIFT);
        let upper = 1u64 << shift;
        let factor = rand::rng().random_range(1..upper);

        let base_ms = self.initial_delay.as_millis().min(u64::MAX as u128) as u64;
        let delay = Duration::from_millis(base_ms.saturating_mul(factor));
        delay.min(self.max_delay)
    }
}
