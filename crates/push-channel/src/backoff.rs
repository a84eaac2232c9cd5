//! Reconnect delay schedule.

use std::time::Duration;

/// `min(max_delay, 2^attempt * base)`. The attempt counter stops growing at
/// `max_attempt` and goes back to zero on every successful open.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max_delay: Duration,
    max_attempt: u32,
    attempt: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectBackoff {
    pub const DEFAULT_MAX_ATTEMPT: u32 = 10;

    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            max_attempt: Self::DEFAULT_MAX_ATTEMPT,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the upcoming retry, without consuming it.
    pub fn peek_delay(&self) -> Duration {
        self.base
            .saturating_mul(1u32 << self.attempt.min(31))
            .min(self.max_delay)
    }

    /// Delay for the upcoming retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek_delay();
        self.attempt = (self.attempt + 1).min(self.max_attempt);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
