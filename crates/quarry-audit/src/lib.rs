//! Resilient audit orchestration.
//!
//! [`AuditRunner`] is the terminal boundary of the protection stack: it wraps
//! one caller-supplied audit operation in circuit breaker → timeout → retry,
//! converts every terminal failure into a [`PartialResult`] instead of
//! propagating it, and drives sequential batches with partial-failure and
//! manual-review semantics. A batch always yields a result or a recorded
//! error per lead; nothing escapes as a bare Err.

pub mod classify;
pub mod error;
pub mod result;
pub mod service;

pub use classify::is_blocked;
pub use error::AuditFailure;
pub use result::{AuditOutcome, AuditStats, BatchOptions, BatchResult, PartialResult};
pub use service::{AuditOperation, AuditRunner, ResourceProvider};
