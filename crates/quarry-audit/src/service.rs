//! The audit runner: per-item protection stack and sequential batch driver.

use crate::error::AuditFailure;
use crate::result::{AuditOutcome, AuditStats, BatchOptions, BatchResult, PartialResult};
use async_trait::async_trait;
use quarry_core::{FailureKind, LeadId};
use quarry_resilience::{
    retry_async, with_timeout, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig,
};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// One audit against one lead, supplied by the site-audit logic.
///
/// The operation may fail with any error; the runner classifies it. The
/// resource is shared because retries re-run the operation against the same
/// acquired resource.
#[async_trait]
pub trait AuditOperation: Send + Sync {
    type Resource: Send + Sync;
    type Output: Send;

    async fn run(
        &self,
        lead_id: &LeadId,
        resource: &Self::Resource,
    ) -> anyhow::Result<Self::Output>;

    /// The URL this lead's audit targets, when known. Surfaced in partial
    /// results and the blocked-site callback.
    fn audit_url(&self, lead_id: &LeadId) -> Option<String> {
        let _ = lead_id;
        None
    }
}

/// Acquires and releases per-item resources for the batch driver.
///
/// The pool's page guards implement the release half by dropping; an impl
/// over `BrowserPool` is a few lines in the composition root.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    type Resource: Send + Sync;

    async fn acquire(&self) -> anyhow::Result<Self::Resource>;

    /// Release errors are swallowed by the driver.
    async fn release(&self, resource: Self::Resource) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Counters {
    total_operations: u64,
    successful: u64,
    partial_audits: u64,
    blocked_sites: u64,
}

type ReviewCallback = Box<dyn Fn(&LeadId, &str) + Send + Sync>;
type BlockedCallback = Box<dyn Fn(&LeadId, Option<&str>, &str) + Send + Sync>;

/// Wraps one audit operation in circuit breaker → timeout → retry and
/// converts every terminal failure into a [`PartialResult`].
///
/// `run_one` never returns an error: the caller always gets a value or a
/// partial result, which is what lets a batch produce one line per lead no
/// matter what the sites did.
pub struct AuditRunner {
    retry: RetryConfig,
    per_call_timeout: Duration,
    circuit: CircuitBreaker,
    counters: Mutex<Counters>,
    review_callbacks: Mutex<Vec<ReviewCallback>>,
    blocked_callbacks: Mutex<Vec<BlockedCallback>>,
}

impl AuditRunner {
    #[must_use]
    pub fn new(
        retry: RetryConfig,
        circuit: CircuitBreakerConfig,
        per_call_timeout: Duration,
    ) -> Self {
        Self {
            retry,
            per_call_timeout,
            circuit: CircuitBreaker::new(circuit),
            counters: Mutex::new(Counters::default()),
            review_callbacks: Mutex::new(Vec::new()),
            blocked_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// The breaker gating every call, for observers and manual resets.
    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Register a callback fired whenever a result is flagged for manual
    /// review, with `(lead_id, reason)`.
    pub fn on_manual_review_required(
        &self,
        callback: impl Fn(&LeadId, &str) + Send + Sync + 'static,
    ) {
        self.review_callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    /// Register a callback fired when a failure classifies as the site
    /// blocking us, with `(lead_id, url, error message)`.
    pub fn on_site_blocked(
        &self,
        callback: impl Fn(&LeadId, Option<&str>, &str) + Send + Sync + 'static,
    ) {
        self.blocked_callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    /// Run one audit through the full protection stack.
    ///
    /// Terminal failures become partial results; this never returns `Err`.
    pub async fn run_one<Op>(
        &self,
        lead_id: &LeadId,
        resource: &Op::Resource,
        operation: &Op,
    ) -> AuditOutcome<Op::Output>
    where
        Op: AuditOperation,
    {
        let started = Instant::now();

        let gated = self
            .circuit
            .execute(|| async {
                let retried = with_timeout(
                    retry_async(move |_ctx| operation.run(lead_id, resource), &self.retry),
                    self.per_call_timeout,
                )
                .await;
                match retried {
                    Ok(outcome) => outcome.result.map_err(AuditFailure::Retry),
                    Err(timeout) => Err(AuditFailure::Timeout(timeout)),
                }
            })
            .await;

        {
            let mut counters = self.counters.lock().expect("counter lock poisoned");
            counters.total_operations += 1;
            if gated.is_ok() {
                counters.successful += 1;
            }
        }

        match gated {
            Ok(value) => AuditOutcome::Complete(value),
            Err(err) => {
                let failure = AuditFailure::from(err);
                let url = operation.audit_url(lead_id);
                AuditOutcome::Partial(self.to_partial(lead_id, &failure, url, started.elapsed()))
            }
        }
    }

    /// Classify a terminal failure into a partial result, update counters,
    /// and fire callbacks.
    fn to_partial(
        &self,
        lead_id: &LeadId,
        failure: &AuditFailure,
        url: Option<String>,
        duration: Duration,
    ) -> PartialResult {
        let kind = failure.kind();
        let mut partial =
            PartialResult::new(lead_id, kind, failure.to_string(), duration).with_url(url);

        match kind {
            FailureKind::Timeout => partial = partial.with_reason("timed out"),
            FailureKind::CircuitOpen => partial = partial.with_reason("service unavailable"),
            FailureKind::Blocked => partial = partial.with_reason("blocked"),
            _ => {}
        }

        {
            let mut counters = self.counters.lock().expect("counter lock poisoned");
            counters.partial_audits += 1;
            if kind == FailureKind::Blocked {
                counters.blocked_sites += 1;
            }
        }

        if kind == FailureKind::Blocked {
            tracing::warn!("Site appears to be blocking audits for lead {}", lead_id);
            for callback in self
                .blocked_callbacks
                .lock()
                .expect("callback lock poisoned")
                .iter()
            {
                callback(lead_id, partial.url.as_deref(), &partial.error);
            }
        }

        if let Some(reason) = partial.manual_review_reason.as_deref() {
            for callback in self
                .review_callbacks
                .lock()
                .expect("callback lock poisoned")
                .iter()
            {
                callback(lead_id, reason);
            }
        }

        partial
    }

    /// Drive a batch strictly in input order, one item in flight.
    ///
    /// Before each item the breaker is consulted: once open, every remaining
    /// lead is marked failed and flagged for review without invoking the
    /// operation. Resources are acquired per item and always released, with
    /// release errors swallowed.
    pub async fn run_batch<P, Op>(
        &self,
        ids: &[LeadId],
        provider: &P,
        operation: &Op,
        options: &BatchOptions,
    ) -> BatchResult<Op::Output>
    where
        P: ResourceProvider,
        Op: AuditOperation<Resource = P::Resource>,
    {
        let mut batch = BatchResult::new(ids.len());

        for (index, lead_id) in ids.iter().enumerate() {
            if self.circuit.state() == CircuitState::Open {
                let remaining = ids.len() - index;
                tracing::warn!(
                    "Circuit open, short-circuiting {} remaining item(s)",
                    remaining
                );
                batch.circuit_tripped = true;
                for skipped in &ids[index..] {
                    let partial = PartialResult::new(
                        skipped,
                        FailureKind::CircuitOpen,
                        "circuit open, item not attempted".to_string(),
                        Duration::ZERO,
                    )
                    .with_reason("service unavailable")
                    .with_url(operation.audit_url(skipped));
                    for callback in self
                        .review_callbacks
                        .lock()
                        .expect("callback lock poisoned")
                        .iter()
                    {
                        callback(skipped, "service unavailable");
                    }
                    batch.failed += 1;
                    batch.requires_manual_review.push(skipped.clone());
                    batch.errors.insert(skipped.clone(), partial.error.clone());
                    batch
                        .results
                        .insert(skipped.clone(), AuditOutcome::Partial(partial));
                }
                break;
            }

            let resource = match provider.acquire().await {
                Ok(resource) => resource,
                Err(e) => {
                    tracing::error!("Resource acquisition failed for lead {}: {}", lead_id, e);
                    batch.failed += 1;
                    batch.errors.insert(lead_id.clone(), e.to_string());
                    if options.continue_on_failure {
                        continue;
                    }
                    break;
                }
            };

            let outcome = self.run_one(lead_id, &resource, operation).await;

            if let Err(e) = provider.release(resource).await {
                tracing::debug!("Ignoring release error for lead {}: {}", lead_id, e);
            }

            let stop = match &outcome {
                AuditOutcome::Complete(_) => {
                    batch.successful += 1;
                    false
                }
                AuditOutcome::Partial(partial) => {
                    batch.partial += 1;
                    if partial.requires_manual_review {
                        batch.requires_manual_review.push(lead_id.clone());
                    }
                    batch.errors.insert(lead_id.clone(), partial.error.clone());
                    !options.continue_on_failure
                }
            };
            batch.results.insert(lead_id.clone(), outcome);

            if stop {
                tracing::warn!(
                    "Stopping batch at lead {} (continue_on_failure=false)",
                    lead_id
                );
                break;
            }
        }

        batch
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        let counters = self.counters.lock().expect("counter lock poisoned");
        AuditStats {
            total_operations: counters.total_operations,
            successful: counters.successful,
            partial_audits: counters.partial_audits,
            blocked_sites: counters.blocked_sites,
        }
    }

    /// Zero the counters. The breaker is reset separately via
    /// [`Self::circuit`].
    pub fn reset(&self) {
        *self.counters.lock().expect("counter lock poisoned") = Counters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn lead(id: &str) -> LeadId {
        LeadId::new(id).expect("valid id")
    }

    struct FlakyOp {
        calls: AtomicU32,
        fail_first: u32,
        error: &'static str,
    }

    #[async_trait]
    impl AuditOperation for FlakyOp {
        type Resource = ();
        type Output = String;

        async fn run(&self, lead_id: &LeadId, _resource: &()) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("{}", self.error);
            }
            Ok(format!("audited {lead_id}"))
        }

        fn audit_url(&self, lead_id: &LeadId) -> Option<String> {
            Some(format!("https://site.example/{lead_id}"))
        }
    }

    struct UnitProvider;

    #[async_trait]
    impl ResourceProvider for UnitProvider {
        type Resource = ();

        async fn acquire(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn release(&self, _resource: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn runner() -> AuditRunner {
        AuditRunner::new(
            RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
                retryable_errors: Vec::new(),
                retryable_status_codes: vec![429, 500, 502, 503, 504],
            },
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout: Duration::from_secs(60),
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_one_success_after_retry() {
        let runner = runner();
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: 1,
            error: "connection reset by peer",
        };

        let outcome = runner.run_one(&lead("lead-1"), &(), &op).await;
        assert!(outcome.is_complete());
        assert_eq!(op.calls.load(Ordering::SeqCst), 2);

        let stats = runner.stats();
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.partial_audits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_one_converts_terminal_failure() {
        let runner = runner();
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: "connection reset by peer",
        };

        let outcome = runner.run_one(&lead("lead-1"), &(), &op).await;
        let partial = outcome.as_partial().expect("partial result");
        assert_eq!(partial.lead_id.as_str(), "lead-1");
        // "connection reset" matches the blocked pattern set
        assert_eq!(partial.kind, FailureKind::Blocked);
        assert_eq!(partial.manual_review_reason.as_deref(), Some("blocked"));
        assert_eq!(partial.url.as_deref(), Some("https://site.example/lead-1"));

        let stats = runner.stats();
        assert_eq!(stats.partial_audits, 1);
        assert_eq!(stats.blocked_sites, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_one_non_blocked_failure_has_no_reason() {
        let runner = runner();
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: "internal server error",
        };

        let outcome = runner.run_one(&lead("lead-1"), &(), &op).await;
        let partial = outcome.as_partial().expect("partial result");
        assert_eq!(partial.kind, FailureKind::Transient);
        assert!(!partial.requires_manual_review);
        assert!(partial.manual_review_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_one_timeout_reason() {
        let runner = AuditRunner::new(
            RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            CircuitBreakerConfig::default(),
            Duration::from_millis(50),
        );

        struct SlowOp;

        #[async_trait]
        impl AuditOperation for SlowOp {
            type Resource = ();
            type Output = ();

            async fn run(&self, _lead_id: &LeadId, _resource: &()) -> anyhow::Result<()> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let outcome = runner.run_one(&lead("lead-1"), &(), &SlowOp).await;
        let partial = outcome.as_partial().expect("partial result");
        assert_eq!(partial.kind, FailureKind::Timeout);
        assert_eq!(partial.manual_review_reason.as_deref(), Some("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_short_circuits_when_circuit_opens() {
        let runner = runner();
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: "internal server error",
        };
        let ids: Vec<LeadId> = (1..=5).map(|i| lead(&format!("lead-{i}"))).collect();

        let batch = runner
            .run_batch(&ids, &UnitProvider, &op, &BatchOptions::default())
            .await;

        // failure_threshold=2 counts one failure per gated call: items 1
        // and 2 open the circuit, items 3..5 are never attempted
        assert!(batch.circuit_tripped);
        assert_eq!(batch.total, 5);
        assert_eq!(batch.partial, 2);
        assert_eq!(batch.failed, 3);
        assert_eq!(op.calls.load(Ordering::SeqCst), 4);
        assert_eq!(batch.requires_manual_review.len(), 3);
        assert!(batch.errors.contains_key("lead-5"));
        let skipped = batch.results["lead-5"].as_partial().expect("partial");
        assert_eq!(skipped.kind, FailureKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_stops_on_failure_when_configured() {
        let runner = AuditRunner::new(
            RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            CircuitBreakerConfig {
                failure_threshold: 100,
                success_threshold: 1,
                timeout: Duration::from_secs(60),
            },
            Duration::from_secs(5),
        );
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: "internal server error",
        };
        let ids: Vec<LeadId> = (1..=3).map(|i| lead(&format!("lead-{i}"))).collect();

        let batch = runner
            .run_batch(
                &ids,
                &UnitProvider,
                &op,
                &BatchOptions {
                    continue_on_failure: false,
                },
            )
            .await;

        assert_eq!(batch.partial, 1);
        assert_eq!(batch.successful, 0);
        assert!(!batch.circuit_tripped);
        assert_eq!(op.calls.load(Ordering::SeqCst), 1);
        assert!(!batch.results.contains_key("lead-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_fire() {
        let runner = runner();
        let reviews: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let blocked: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::new(Mutex::new(Vec::new()));

        let reviews_sink = reviews.clone();
        runner.on_manual_review_required(move |id, reason| {
            reviews_sink
                .lock()
                .unwrap()
                .push((id.to_string(), reason.to_string()));
        });
        let blocked_sink = blocked.clone();
        runner.on_site_blocked(move |id, url, _error| {
            blocked_sink
                .lock()
                .unwrap()
                .push((id.to_string(), url.map(String::from)));
        });

        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: "access denied",
        };
        let _ = runner.run_one(&lead("lead-1"), &(), &op).await;

        assert_eq!(
            reviews.lock().unwrap().as_slice(),
            &[("lead-1".to_string(), "blocked".to_string())]
        );
        assert_eq!(
            blocked.lock().unwrap().as_slice(),
            &[(
                "lead-1".to_string(),
                Some("https://site.example/lead-1".to_string())
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_zeroes_counters() {
        let runner = runner();
        let op = FlakyOp {
            calls: AtomicU32::new(0),
            fail_first: 0,
            error: "",
        };
        let _ = runner.run_one(&lead("lead-1"), &(), &op).await;
        assert_eq!(runner.stats().total_operations, 1);

        runner.reset();
        assert_eq!(runner.stats().total_operations, 0);
    }
}
