//! Leaky-bucket rate primitive.
//!
//! Refill is lazy: every call settles elapsed whole refill intervals before
//! deciding. `try_consume` never waits and has no side effects on failure;
//! the wait hint it returns is sufficient, not heuristic — once it elapses a
//! retry for the same count succeeds absent concurrent drain.

use crate::error::{Result, TrafficError};
use quarry_core::config::RateLimitSettings;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Upper bound on how long `consume` will wait for tokens.
const MAX_CONSUME_WAIT: Duration = Duration::from_secs(60);

/// Token bucket configuration.
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Burst capacity
    pub capacity: f64,
    /// Tokens restored per refill interval
    pub refill_rate: f64,
    /// Refill interval
    pub refill_interval: Duration,
    /// Starting token count; defaults to `capacity`
    pub initial_tokens: Option<f64>,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for TokenBucketConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            capacity: settings.bucket_capacity,
            refill_rate: settings.refill_rate,
            refill_interval: Duration::from_millis(settings.refill_interval_ms),
            initial_tokens: None,
        }
    }
}

/// Outcome of a non-blocking consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeDecision {
    /// Whether the tokens were taken
    pub granted: bool,
    /// Minimum wait before a retry for the same count can succeed
    pub wait: Duration,
    /// Tokens remaining after the call
    pub remaining: f64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Leaky-bucket rate limiter primitive.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new bucket, full unless `initial_tokens` says otherwise.
    #[must_use]
    pub fn new(config: TokenBucketConfig) -> Self {
        let tokens = config
            .initial_tokens
            .unwrap_or(config.capacity)
            .clamp(0.0, config.capacity);
        Self {
            state: Mutex::new(BucketState {
                tokens,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    /// Settle elapsed whole intervals into the token count.
    ///
    /// `last_refill` advances only by the consumed intervals so partial
    /// intervals keep accruing.
    fn refill(&self, state: &mut BucketState) {
        let interval_ms = self.config.refill_interval.as_millis();
        if interval_ms == 0 {
            state.tokens = self.config.capacity;
            state.last_refill = Instant::now();
            return;
        }

        let elapsed_ms = state.last_refill.elapsed().as_millis();
        let intervals = elapsed_ms / interval_ms;
        if intervals > 0 {
            let added = intervals as f64 * self.config.refill_rate;
            state.tokens = (state.tokens + added).min(self.config.capacity);
            state.last_refill += self.config.refill_interval * intervals as u32;
        }
    }

    /// Try to take `count` tokens without waiting.
    #[must_use]
    pub fn try_consume(&self, count: u32) -> ConsumeDecision {
        let requested = f64::from(count);
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);

        if state.tokens >= requested {
            state.tokens -= requested;
            ConsumeDecision {
                granted: true,
                wait: Duration::ZERO,
                remaining: state.tokens,
            }
        } else {
            let deficit = requested - state.tokens;
            let intervals_needed = (deficit / self.config.refill_rate).ceil();
            let wait = Duration::from_millis(
                (intervals_needed * self.config.refill_interval.as_millis() as f64) as u64,
            );
            ConsumeDecision {
                granted: false,
                wait,
                remaining: state.tokens,
            }
        }
    }

    /// Take `count` tokens, waiting for refills as needed.
    ///
    /// An explicit re-check-and-sleep loop bounded by [`MAX_CONSUME_WAIT`];
    /// sustained contention yields [`TrafficError::WaitExhausted`] rather
    /// than waiting forever.
    pub async fn consume(&self, count: u32) -> Result<()> {
        let started = Instant::now();
        loop {
            let decision = self.try_consume(count);
            if decision.granted {
                return Ok(());
            }

            if started.elapsed() + decision.wait > MAX_CONSUME_WAIT {
                return Err(TrafficError::WaitExhausted {
                    waited: started.elapsed(),
                });
            }
            sleep(decision.wait).await;
        }
    }

    /// Whether `count` tokens are available right now.
    #[must_use]
    pub fn has_tokens(&self, count: u32) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.tokens >= f64::from(count)
    }

    /// Current token count after settling refills.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.tokens
    }

    /// Refill to capacity and restart the refill clock.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        state.tokens = self.config.capacity;
        state.last_refill = Instant::now();
    }
}
