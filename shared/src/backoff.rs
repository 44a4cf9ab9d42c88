//! Reconnect policy with uncapped exponential backoff and an attempt ceiling

use std::time::Duration;

/// Tracks consecutive reconnect attempts
///
/// The delay before attempt `n` (0-based) is `base_delay * 2^n`. Growth is
/// not capped; the attempt ceiling is what stops the client from retrying
/// forever.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Number of retries scheduled since the last successful connect
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once no further retry may be scheduled
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay for a given attempt number, saturating instead of overflowing
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Consume one attempt and return its delay, or `None` when exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Forget previous failures (successful connect or forced reconnect)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Whole milliseconds for logging, saturating at `u64::MAX`
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
