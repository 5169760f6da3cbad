//! Result types returned by the runner.

use quarry_core::{FailureKind, LeadId};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// A failed or degraded audit, converted from a terminal error.
///
/// These are returned to the caller, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PartialResult {
    /// Unique id of this result record
    pub id: String,
    /// The lead this audit was for
    pub lead_id: LeadId,
    /// Always true; present so mixed result lists stay self-describing
    pub is_partial: bool,
    /// Where the failure sits in the shared taxonomy
    pub kind: FailureKind,
    /// The audited URL, when the operation knows it
    pub url: Option<String>,
    /// Whether a human should look at this lead
    pub requires_manual_review: bool,
    /// Why review is required, when a reason was classified
    pub manual_review_reason: Option<String>,
    /// The terminal error message
    pub error: String,
    /// Wall time spent on this item, including retries and waits
    pub duration_ms: u64,
}

impl PartialResult {
    pub(crate) fn new(
        lead_id: &LeadId,
        kind: FailureKind,
        error: String,
        duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lead_id: lead_id.clone(),
            is_partial: true,
            kind,
            url: None,
            requires_manual_review: false,
            manual_review_reason: None,
            error,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub(crate) fn with_reason(mut self, reason: &str) -> Self {
        self.requires_manual_review = true;
        self.manual_review_reason = Some(reason.to_string());
        self
    }

    pub(crate) fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// What one audit produced: the operation's value, or a partial result
/// standing in for a failure.
#[derive(Debug, Serialize)]
pub enum AuditOutcome<T> {
    Complete(T),
    Partial(PartialResult),
}

impl<T> AuditOutcome<T> {
    /// True when the operation produced its value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// The partial result, if this outcome is one.
    #[must_use]
    pub fn as_partial(&self) -> Option<&PartialResult> {
        match self {
            Self::Complete(_) => None,
            Self::Partial(p) => Some(p),
        }
    }
}

/// Options for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Keep going after a failed item; when false the batch stops at the
    /// first non-success
    pub continue_on_failure: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_failure: true,
        }
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Serialize)]
pub struct BatchResult<T> {
    /// Items requested
    pub total: usize,
    /// Items whose operation produced a value
    pub successful: usize,
    /// Items whose operation ran but terminally failed
    pub partial: usize,
    /// Items that never ran (circuit short-circuit, acquisition failure)
    pub failed: usize,
    /// Leads needing human triage, in batch order
    pub requires_manual_review: Vec<LeadId>,
    /// Per-lead outcomes for every item that was reached
    pub results: HashMap<LeadId, AuditOutcome<T>>,
    /// Per-lead terminal error messages for every non-success
    pub errors: HashMap<LeadId, String>,
    /// True when the breaker cut the run short
    pub circuit_tripped: bool,
}

impl<T> BatchResult<T> {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            successful: 0,
            partial: 0,
            failed: 0,
            requires_manual_review: Vec::new(),
            results: HashMap::new(),
            errors: HashMap::new(),
            circuit_tripped: false,
        }
    }
}

/// Running counters for the service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    /// Operations attempted through `run_one`
    pub total_operations: u64,
    /// Operations that completed
    pub successful: u64,
    /// Terminal failures converted to partial results
    pub partial_audits: u64,
    /// Failures classified as the site blocking us
    pub blocked_sites: u64,
}
