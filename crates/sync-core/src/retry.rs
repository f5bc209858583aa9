use std::time::Duration;

use crate::error::SyncError;

/// Caller-side reconnect backoff.
///
/// The sync core never retries on its own; hosts consult this policy when
/// they decide to re-invoke `open` after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential delay for a zero-based attempt, raised to any server hint
    /// and capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint: Option<Duration>) -> Duration {
        let multiplier = 1_u32 << attempt.min(20);
        let calculated = self.base_delay.saturating_mul(multiplier);
        calculated
            .max(retry_after_hint.unwrap_or_default())
            .min(self.max_delay)
    }

    /// Delay before retrying after `err`, or `None` when the caller should
    /// give up: attempts exhausted or the error is not recoverable.
    pub fn next_delay(&self, attempt: u32, err: &SyncError) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_recoverable() {
            return None;
        }
        let hint = err.retry_after_ms.map(Duration::from_millis);
        Some(self.delay_for_attempt(attempt, hint))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 3)
    }
}
