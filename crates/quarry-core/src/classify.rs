//! Failure classification for errors raised by third-party sites and APIs.
//!
//! Quarry's own errors are structured `thiserror` variants, but errors from
//! uncontrolled external dependencies (browser crashes, HTTP stacks, audit
//! operations supplied by callers) arrive as opaque messages. This module is
//! the fallback adapter that classifies them: first by error code, then by
//! message heuristics, then by HTTP status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad failure taxonomy used across the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection resets, timeouts, 5xx — worth retrying with backoff
    Transient,
    /// Validation and auth failures — retrying cannot help
    NonRetryable,
    /// Bot detection, captcha, access denied — feeds block-rate alerting
    Blocked,
    /// Operation exceeded its deadline
    Timeout,
    /// Circuit breaker rejected the call without invoking it
    CircuitOpen,
    /// Nothing matched; treated as retryable
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::NonRetryable => "non-retryable",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit-open",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Retry verdict for a single classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    NonRetryable,
    Unknown,
}

/// Structured view of an error for classification.
///
/// Errors produced inside Quarry populate `code`/`status` directly; errors
/// from external dependencies usually carry only a message.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails {
    /// Machine-readable error code, e.g. `ECONNRESET`
    pub code: Option<String>,
    /// HTTP status, when the error came from an HTTP response
    pub status: Option<u16>,
    /// Human-readable message
    pub message: String,
}

impl ErrorDetails {
    /// Build details from a bare message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// Attach an error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach an HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Extract details from any error chain, using the display message.
    #[must_use]
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self::from_message(format!("{error:#}"))
    }
}

impl From<anyhow::Error> for ErrorDetails {
    fn from(error: anyhow::Error) -> Self {
        Self::from_error(&error)
    }
}

/// Message fragments that indicate a transient failure.
const RETRYABLE_FRAGMENTS: &[&str] = &[
    "rate limit",
    "too many requests",
    "timeout",
    "timed out",
    "network",
    "connection reset",
    "connection refused",
    "econnreset",
    "econnrefused",
    "etimedout",
    "dns",
    "temporarily unavailable",
];

/// Message fragments that indicate retrying cannot help.
const NON_RETRYABLE_FRAGMENTS: &[&str] = &[
    "validation",
    "invalid",
    "unauthorized",
    "forbidden",
    "not found",
    "bad request",
];

/// Classify an error in a fixed precedence order.
///
/// 1. `code` against the configured retryable-code list
/// 2. message substring heuristics (transient beats non-retryable)
/// 3. `status` against the retryable-status list, else any 4xx is
///    non-retryable
///
/// Anything that matches nothing is `Unknown`, which callers treat as
/// retryable.
#[must_use]
pub fn classify_details(
    details: &ErrorDetails,
    retryable_codes: &[String],
    retryable_statuses: &[u16],
) -> Verdict {
    if let Some(code) = &details.code {
        if retryable_codes.iter().any(|c| c.eq_ignore_ascii_case(code)) {
            return Verdict::Retryable;
        }
    }

    let message = details.message.to_lowercase();
    if RETRYABLE_FRAGMENTS.iter().any(|f| message.contains(f)) {
        return Verdict::Retryable;
    }
    if NON_RETRYABLE_FRAGMENTS.iter().any(|f| message.contains(f)) {
        return Verdict::NonRetryable;
    }

    if let Some(status) = details.status {
        if retryable_statuses.contains(&status) {
            return Verdict::Retryable;
        }
        if (400..500).contains(&status) {
            return Verdict::NonRetryable;
        }
        if status >= 500 {
            return Verdict::Retryable;
        }
    }

    Verdict::Unknown
}
