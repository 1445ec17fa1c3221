//! Bounded exponential backoff policy
//!
//! One schedule shared by every poll loop in the pipeline (table readability,
//! settlement checks). Delay after failed attempt `n` is `min(2^n * base, max)`.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts before giving up
    pub max_attempts: u32,
    /// Base delay, doubled per attempt
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to sleep after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^attempt saturates well past any sane max_delay
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(8, Duration::from_millis(250), Duration::from_secs(5))
    }
}
