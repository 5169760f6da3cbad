//! Deadline enforcement for audit operations.
//!
//! Built on `tokio::time::timeout`, so there is no timer to leak: the timer
//! is a future dropped with the race. Cooperative cancellation uses
//! `tokio_util::sync::CancellationToken`; an operation that ignores its token
//! is abandoned at the deadline but cannot be forcibly preempted, so callers
//! must not assume immediate resource release.

use crate::error::TimeoutError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default message for timeout errors without caller context.
const DEFAULT_TIMEOUT_MESSAGE: &str = "operation timed out";

/// Race a future against a deadline.
///
/// # Errors
/// Returns [`TimeoutError`] carrying the configured duration if the deadline
/// fires first.
pub async fn with_timeout<F, T>(future: F, timeout: Duration) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    with_timeout_msg(future, timeout, DEFAULT_TIMEOUT_MESSAGE).await
}

/// [`with_timeout`] with a caller-supplied context message.
pub async fn with_timeout_msg<F, T>(
    future: F,
    timeout: Duration,
    message: &str,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| TimeoutError::new(timeout, message))
}

/// Race a future against an absolute deadline.
///
/// Fails immediately with zero wait if the deadline has already passed.
pub async fn with_deadline<F, T>(future: F, deadline: Instant) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let now = Instant::now();
    if deadline <= now {
        return Err(TimeoutError::new(Duration::ZERO, "deadline already passed"));
    }
    with_timeout_msg(future, deadline - now, "deadline reached").await
}

/// Handle for cancelling a [`cancellable_timeout`] operation from outside.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Signal the operation to stop. The operation is expected to observe
    /// the token and exit early; it is not forcibly preempted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once `cancel()` has been called (or the deadline fired).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Run an operation under a deadline with a cancellation signal.
///
/// The operation receives a [`CancellationToken`] it should observe at its
/// own suspension points. The returned [`CancelHandle`] aborts the signal
/// externally; the deadline firing cancels the token as well before
/// rejecting.
pub fn cancellable_timeout<F, Fut, T>(
    operation: F,
    timeout: Duration,
) -> (CancelHandle, impl Future<Output = Result<T, TimeoutError>>)
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let token = CancellationToken::new();
    let handle = CancelHandle {
        token: token.clone(),
    };

    let future = async move {
        let inner = operation(token.child_token());
        match tokio::time::timeout(timeout, inner).await {
            Ok(value) => Ok(value),
            Err(_) => {
                token.cancel();
                Err(TimeoutError::new(timeout, DEFAULT_TIMEOUT_MESSAGE))
            }
        }
    };

    (handle, future)
}
