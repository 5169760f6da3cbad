//! Resilience protections for unreliable long-running operations.
//!
//! Third-party sites fail in every way imaginable: they hang, reset
//! connections, rate-limit, or go down for hours. This crate provides the
//! three protections Quarry composes around every audit call: a retry driver
//! with failure classification and exponential backoff, a timeout guard with
//! cooperative cancellation, and a circuit breaker that stops hammering a
//! dependency that is clearly down.

pub mod circuit;
pub mod error;
pub mod retry;
pub mod timeout;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChange};
pub use error::{CircuitError, RetryError, TimeoutError};
pub use retry::{retry_async, retry_async_with, AttemptContext, RetryConfig, RetryNotice, RetryOutcome};
pub use timeout::{cancellable_timeout, with_deadline, with_timeout, with_timeout_msg, CancelHandle};
