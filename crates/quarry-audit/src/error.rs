use crate::classify::is_blocked;
use quarry_core::FailureKind;
use quarry_resilience::{CircuitError, RetryError, TimeoutError};
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of one protected audit call.
///
/// This is what the runner classifies into a partial result; it is exposed
/// so callers inspecting [`crate::PartialResult`] provenance in tests can
/// match on the failure mode instead of its message.
#[derive(Debug, Error)]
pub enum AuditFailure {
    /// The whole retry sequence exceeded the per-call deadline
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Retries ended without success
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// The circuit rejected the call without invoking the operation
    #[error("service unavailable, circuit open for another {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
}

impl AuditFailure {
    /// This failure's place in the shared taxonomy. Blocked-site evidence
    /// takes precedence over how the retry driver gave up.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Retry(retry) if is_blocked(retry.details()) => FailureKind::Blocked,
            Self::Retry(RetryError::NonRetryable { .. }) => FailureKind::NonRetryable,
            Self::Retry(RetryError::Exhausted { .. }) => FailureKind::Transient,
        }
    }
}

impl From<CircuitError<AuditFailure>> for AuditFailure {
    fn from(err: CircuitError<AuditFailure>) -> Self {
        match err {
            CircuitError::Open { retry_in } => Self::CircuitOpen { retry_in },
            CircuitError::Operation(inner) => inner,
        }
    }
}
