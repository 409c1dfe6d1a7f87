use std::time::Duration;

use crate::error::AppError;

/// Retry budget for transport failures within a single fetch.
///
/// Delay schedule: `base`, `2 * base`, `4 * base`, ... capped at `max_delay`.
/// Only [`AppError::is_retryable`] errors are retried; render failures and
/// compliance blocks never are.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }

    /// Whether `err` on retry number `attempt` (0 for the first try) should be
    /// followed by another attempt.
    pub fn should_retry(&self, err: &AppError, attempt: u32) -> bool {
        attempt < self.max_retries && err.is_retryable()
    }
}
