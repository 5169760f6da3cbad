//! Human-like request pacing on top of the token bucket.
//!
//! Two independent mechanisms: the bucket enforces the long-run rate, and a
//! randomized inter-request delay makes the gap between consecutive requests
//! look like a person browsing. A factory multiplexes named limiters so
//! independent traffic categories (search engines, lead sites, APIs) are
//! paced independently.

use crate::bucket::{TokenBucket, TokenBucketConfig};
use crate::error::Result;
use quarry_core::config::RateLimitSettings;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Minimum inter-request delay
    pub min_delay: Duration,
    /// Maximum inter-request delay
    pub max_delay: Duration,
    /// Whether to jitter the randomized target delay
    pub enable_jitter: bool,
    /// Jitter as a fraction of the target delay
    pub jitter_factor: f64,
    /// Token bucket behind the pacer
    pub bucket: TokenBucketConfig,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for RateLimiterConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            enable_jitter: settings.enable_jitter,
            jitter_factor: settings.jitter_factor,
            bucket: TokenBucketConfig::from(settings),
        }
    }
}

/// Running statistics for one limiter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimiterStats {
    /// Slots granted
    pub requests: u64,
    /// Slots that had to wait on the token bucket
    pub throttled: u64,
    /// Cumulative delay slept, milliseconds
    pub total_delay_ms: u64,
    /// Average delay per request, milliseconds
    pub average_delay_ms: u64,
}

#[derive(Debug, Default)]
struct PacerState {
    last_request: Option<Instant>,
    requests: u64,
    throttled: u64,
    total_delay: Duration,
}

/// Paces one stream of outbound requests.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: TokenBucket,
    state: Mutex<PacerState>,
}

impl RateLimiter {
    /// Create a new limiter.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.bucket.clone()),
            config,
            state: Mutex::new(PacerState::default()),
        }
    }

    /// Randomized target delay in `[min_delay, max_delay]`, optionally
    /// jittered and clamped back into the configured bounds.
    fn target_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let min = self.config.min_delay.as_millis() as f64;
        let max = self.config.max_delay.as_millis() as f64;
        let mut delay = if max > min {
            rng.gen_range(min..=max)
        } else {
            min
        };

        if self.config.enable_jitter && self.config.jitter_factor > 0.0 {
            let jitter = rng.gen_range(-self.config.jitter_factor..=self.config.jitter_factor);
            delay = (delay + delay * jitter).clamp(min, max);
        }

        Duration::from_millis(delay as u64)
    }

    /// Wait until the next request may go out.
    ///
    /// Consumes a bucket token (awaiting refill if necessary), then sleeps
    /// whatever remains of the randomized target gap since the previous
    /// request. The very first call sleeps a random value in
    /// `[0, min_delay)` so batch starts are staggered.
    pub async fn wait_for_slot(&self) -> Result<()> {
        let bucket_wait_start = Instant::now();
        let throttled = !self.bucket.try_consume(1).granted;
        if throttled {
            self.bucket.consume(1).await?;
        }
        let bucket_wait = bucket_wait_start.elapsed();

        let pacing_sleep = {
            let state = self.state.lock().expect("pacer lock poisoned");
            match state.last_request {
                Some(last) => self.target_delay().saturating_sub(last.elapsed()),
                None => {
                    let min = self.config.min_delay.as_millis() as u64;
                    if min == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_millis(rand::thread_rng().gen_range(0..min))
                    }
                }
            }
        };

        if pacing_sleep > Duration::ZERO {
            sleep(pacing_sleep).await;
        }

        let mut state = self.state.lock().expect("pacer lock poisoned");
        state.last_request = Some(Instant::now());
        state.requests += 1;
        if throttled {
            state.throttled += 1;
        }
        state.total_delay += bucket_wait + pacing_sleep;
        Ok(())
    }

    /// Stats snapshot.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().expect("pacer lock poisoned");
        let total_ms = state.total_delay.as_millis() as u64;
        RateLimiterStats {
            requests: state.requests,
            throttled: state.throttled,
            total_delay_ms: total_ms,
            average_delay_ms: if state.requests > 0 {
                total_ms / state.requests
            } else {
                0
            },
        }
    }
}

/// Multiplexes named limiter instances, one per traffic category.
#[derive(Debug, Default)]
pub struct RateLimiterFactory {
    default_config: RateLimiterConfig,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterFactory {
    /// Create a factory whose limiters share `default_config`.
    #[must_use]
    pub fn new(default_config: RateLimiterConfig) -> Self {
        Self {
            default_config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the limiter for a traffic category.
    #[must_use]
    pub fn limiter(&self, name: &str) -> Arc<RateLimiter> {
        self.limiter_with(name, || self.default_config.clone())
    }

    /// Get or create with a category-specific configuration. The config is
    /// only used on first creation.
    pub fn limiter_with(
        &self,
        name: &str,
        config: impl FnOnce() -> RateLimiterConfig,
    ) -> Arc<RateLimiter> {
        let mut limiters = self.limiters.lock().expect("factory lock poisoned");
        limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating rate limiter for category '{}'", name);
                Arc::new(RateLimiter::new(config()))
            })
            .clone()
    }

    /// Names of all categories seen so far.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let limiters = self.limiters.lock().expect("factory lock poisoned");
        limiters.keys().cloned().collect()
    }
}
