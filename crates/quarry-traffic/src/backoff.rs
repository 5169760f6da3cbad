//! Escalating wait calculator for repeated blocks.
//!
//! Owned by the session manager: each recorded block escalates the suggested
//! wait exponentially, a recovery resets it.

use std::time::Duration;

/// Escalating backoff for block responses.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
    multiplier: f64,
    consecutive_failures: u32,
}

impl BackoffCalculator {
    /// Create a calculator starting at `base` and capping at `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
            consecutive_failures: 0,
        }
    }

    /// Record a failure and return the suggested wait before the next try.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;
        self.current_delay()
    }

    /// Suggested wait at the current escalation level.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.consecutive_failures - 1).min(16);
        let delay =
            self.base.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        Duration::from_millis(delay.min(self.max.as_millis() as f64) as u64)
    }

    /// Clear the escalation after a successful request.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Consecutive failures recorded since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300), 2.0)
    }
}
