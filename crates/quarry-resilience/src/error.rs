//! Typed errors for the resilience layer.
//!
//! Each protection rejects with its own error type so callers can tell a
//! deadline miss from exhausted retries from a fast-failed circuit without
//! string matching.

use quarry_core::ErrorDetails;
use std::time::Duration;
use thiserror::Error;

/// An operation exceeded its deadline.
#[derive(Debug, Error)]
#[error("{message} (timed out after {timeout:?})")]
pub struct TimeoutError {
    /// The configured timeout that elapsed
    pub timeout: Duration,
    /// Context message, defaults to "operation timed out"
    pub message: String,
}

impl TimeoutError {
    pub(crate) fn new(timeout: Duration, message: impl Into<String>) -> Self {
        Self {
            timeout,
            message: message.into(),
        }
    }
}

/// Terminal failure from the retry driver.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The error was classified non-retryable; no further attempts were made
    #[error("non-retryable error after {attempts} attempt(s): {}", details.message)]
    NonRetryable {
        attempts: u32,
        details: ErrorDetails,
    },

    /// Every allowed attempt failed
    #[error("retries exhausted after {attempts} attempt(s): {}", details.message)]
    Exhausted {
        attempts: u32,
        details: ErrorDetails,
    },
}

impl RetryError {
    /// Details of the last error observed.
    #[must_use]
    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::NonRetryable { details, .. } | Self::Exhausted { details, .. } => details,
        }
    }

    /// Number of operation invocations actually made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::NonRetryable { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Rejection from a circuit-breaker-gated call.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open; the protected function was not invoked
    #[error("circuit open, retry in {retry_in:?}")]
    Open {
        /// Remaining cool-down before the next half-open probe
        retry_in: Duration,
    },

    /// The protected function ran and failed
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// True if this rejection happened without invoking the protected call.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}
