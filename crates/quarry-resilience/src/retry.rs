//! Retry driver with failure classification and exponential backoff.
//!
//! Generic over any fallible async operation. Every failure is classified
//! before a retry is considered: structured error kinds are preferred, with
//! the message/status heuristics from `quarry_core::classify` as the fallback
//! for errors raised by uncontrolled external dependencies.

use crate::error::RetryError;
use quarry_core::classify::{classify_details, ErrorDetails, Verdict};
use quarry_core::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for the retry driver.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum operation invocations (first attempt included)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on any single retry delay
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the computed delay
    pub jitter_factor: f64,
    /// Error codes always treated as retryable
    pub retryable_errors: Vec<String>,
    /// HTTP statuses treated as retryable
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter_factor: settings.jitter_factor,
            retryable_errors: settings.retryable_errors.clone(),
            retryable_status_codes: settings.retryable_status_codes.clone(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retrying after `attempt` failures (1-based),
    /// jittered symmetrically and clamped to zero.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter_factor > 0.0 {
            let jitter = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
            capped + capped * jitter
        } else {
            capped
        };

        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Context handed to the operation on each attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Current attempt, 1-based
    pub attempt: u32,
    /// Configured attempt cap
    pub max_attempts: u32,
    /// Details of the previous attempt's error, if any
    pub last_error: Option<ErrorDetails>,
    /// Cumulative backoff slept so far
    pub total_delay: Duration,
}

/// Notification fired before each backoff sleep.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// Attempt that just failed, 1-based
    pub attempt: u32,
    /// Delay about to be slept
    pub delay: Duration,
    /// The error that caused the retry
    pub error: &'a ErrorDetails,
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result: the operation's value or the terminal retry error
    pub result: Result<T, RetryError>,
    /// Number of operation invocations actually made
    pub attempts: u32,
    /// Total backoff slept between attempts
    pub total_delay: Duration,
}

impl<T> RetryOutcome<T> {
    /// True if the operation eventually succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Retry an async operation with classification and exponential backoff.
///
/// Sleeps only between attempts, never after the last. A non-retryable
/// verdict terminates immediately; `Unknown` is treated as retryable.
pub async fn retry_async<F, Fut, T, E>(operation: F, config: &RetryConfig) -> RetryOutcome<T>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ErrorDetails>,
{
    retry_async_with(operation, config, |_| {}).await
}

/// Like [`retry_async`], firing `on_retry` before each backoff sleep.
pub async fn retry_async_with<F, Fut, T, E, C>(
    mut operation: F,
    config: &RetryConfig,
    mut on_retry: C,
) -> RetryOutcome<T>
where
    F: FnMut(AttemptContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ErrorDetails>,
    C: FnMut(&RetryNotice<'_>),
{
    let max_attempts = config.max_attempts.max(1);
    let mut total_delay = Duration::ZERO;
    let mut last_error: Option<ErrorDetails> = None;

    for attempt in 1..=max_attempts {
        let context = AttemptContext {
            attempt,
            max_attempts,
            last_error: last_error.clone(),
            total_delay,
        };

        match operation(context).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    total_delay,
                };
            }
            Err(error) => {
                let details: ErrorDetails = error.into();
                let verdict = classify_details(
                    &details,
                    &config.retryable_errors,
                    &config.retryable_status_codes,
                );

                if verdict == Verdict::NonRetryable {
                    return RetryOutcome {
                        result: Err(RetryError::NonRetryable {
                            attempts: attempt,
                            details,
                        }),
                        attempts: attempt,
                        total_delay,
                    };
                }

                if attempt == max_attempts {
                    return RetryOutcome {
                        result: Err(RetryError::Exhausted {
                            attempts: attempt,
                            details,
                        }),
                        attempts: attempt,
                        total_delay,
                    };
                }

                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt,
                    max_attempts,
                    details.message,
                    delay
                );
                on_retry(&RetryNotice {
                    attempt,
                    delay,
                    error: &details,
                });

                sleep(delay).await;
                total_delay += delay;
                last_error = Some(details);
            }
        }
    }

    unreachable!("loop returns on success, non-retryable error, or final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            retryable_errors: vec!["ECONNRESET".to_string()],
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let outcome = retry_async(
            |_ctx| async { Ok::<_, ErrorDetails>(42) },
            &fast_config(),
        )
        .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
        assert_eq!(outcome.result.expect("success"), 42);
    }

    #[tokio::test]
    async fn test_retryable_code_exhausts_all_attempts() {
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            |_ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ErrorDetails::from_message("socket closed").with_code("ECONNRESET"))
                }
            },
            &fast_config(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            |_ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ErrorDetails::from_message("validation failed: bad URL")) }
            },
            &fast_config(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_delay, Duration::ZERO);
        assert!(matches!(
            outcome.result,
            Err(RetryError::NonRetryable { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            |_ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ErrorDetails::from_message("connection reset by peer"))
                    } else {
                        Ok("audited")
                    }
                }
            },
            &fast_config(),
        )
        .await;

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.total_delay > Duration::ZERO);
        assert_eq!(outcome.result.expect("recovered"), "audited");
    }

    #[tokio::test]
    async fn test_attempt_context_carries_last_error() {
        let outcome = retry_async(
            |ctx| async move {
                if ctx.attempt == 1 {
                    assert!(ctx.last_error.is_none());
                    Err(ErrorDetails::from_message("timeout fetching page"))
                } else {
                    let last = ctx.last_error.expect("previous error recorded");
                    assert!(last.message.contains("timeout"));
                    Ok(ctx.attempt)
                }
            },
            &fast_config(),
        )
        .await;

        assert_eq!(outcome.result.expect("second attempt"), 2);
    }

    #[tokio::test]
    async fn test_on_retry_fires_between_attempts_only() {
        let notices = AtomicU32::new(0);
        let outcome = retry_async_with(
            |_ctx| async { Err::<(), _>(ErrorDetails::from_message("network unreachable")) },
            &fast_config(),
            |notice| {
                notices.fetch_add(1, Ordering::SeqCst);
                assert!(notice.error.message.contains("network"));
            },
        )
        .await;

        // 3 attempts, sleeps (and notices) only between them
        assert_eq!(outcome.attempts, 3);
        assert_eq!(notices.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_is_capped_and_non_negative() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..fast_config()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(20));
        // 10 * 2^3 = 80, capped at 50
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(50));

        let jittery = RetryConfig {
            jitter_factor: 1.0,
            ..fast_config()
        };
        for attempt in 1..6 {
            // With full jitter the delay may reach zero but never wraps
            let delay = jittery.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_millis(100));
        }
    }
}
