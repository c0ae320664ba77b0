//! Retry policy for failed queue items.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `base_delay * 2^retry_count`, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry ceiling; an item failing at this count is terminal.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound on a single delay (`None` = uncapped).
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay before the retry that follows failure number `retry_count`.
    ///
    /// `retry_count` is the already-incremented count, so the first retry
    /// waits `2 * base_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = 2u32
            .checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Check if the item may be retried after failing at `retry_count`.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Whole milliseconds in `delay`, clamped to `u64::MAX`.
pub(crate) fn millis_saturating(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
