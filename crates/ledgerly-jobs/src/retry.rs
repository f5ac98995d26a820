//! Delivery bound and exponential backoff.

use std::time::Duration;

use ledgerly_core::defaults::{QUEUE_BACKOFF_BASE_MS, QUEUE_BACKOFF_MAX_MS, QUEUE_MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries allowed per message, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: QUEUE_MAX_ATTEMPTS,
            base_delay_ms: QUEUE_BACKOFF_BASE_MS,
            max_delay_ms: QUEUE_BACKOFF_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `QUEUE_MAX_ATTEMPTS` | `3` |
    /// | `QUEUE_BACKOFF_BASE_MS` | `1000` |
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("QUEUE_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(QUEUE_MAX_ATTEMPTS)
            .max(1);
        let base_delay_ms = std::env::var("QUEUE_BACKOFF_BASE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(QUEUE_BACKOFF_BASE_MS);

        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: QUEUE_BACKOFF_MAX_MS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Delay before the delivery after `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
