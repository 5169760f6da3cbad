//! End-to-end composition of the traffic, pool, and audit layers, the way a
//! batch driver wires them together.

use async_trait::async_trait;
use quarry_audit::{AuditOperation, AuditRunner, BatchOptions, ResourceProvider};
use quarry_core::LeadId;
use quarry_pool::{
    AcquireOptions, AutomationClient, BrowserPool, ClientFactory, ContextHandle, PageHandle,
    PoolConfig, PooledPage,
};
use quarry_resilience::{CircuitBreakerConfig, RetryConfig};
use quarry_traffic::{
    RateLimiter, RateLimiterConfig, RequestMonitor, RequestMonitorConfig, RequestOutcome,
    TokenBucketConfig,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StubPage;

#[async_trait]
impl PageHandle for StubPage {
    async fn url(&self) -> quarry_pool::Result<Option<String>> {
        Ok(Some("about:blank".to_string()))
    }
    async fn close(&self) -> quarry_pool::Result<()> {
        Ok(())
    }
}

struct StubContext;

#[async_trait]
impl ContextHandle for StubContext {
    async fn close(&self) -> quarry_pool::Result<()> {
        Ok(())
    }
}

struct StubClient {
    connected: AtomicBool,
}

#[async_trait]
impl AutomationClient for StubClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
    async fn create_context(
        &self,
        _options: &AcquireOptions,
    ) -> quarry_pool::Result<Box<dyn ContextHandle>> {
        Ok(Box::new(StubContext))
    }
    async fn create_page(
        &self,
        _options: &AcquireOptions,
    ) -> quarry_pool::Result<Box<dyn PageHandle>> {
        Ok(Box::new(StubPage))
    }
    async fn disconnect(&self) -> quarry_pool::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct StubFactory;

#[async_trait]
impl ClientFactory for StubFactory {
    async fn connect(&self) -> quarry_pool::Result<Arc<dyn AutomationClient>> {
        Ok(Arc::new(StubClient {
            connected: AtomicBool::new(true),
        }))
    }
}

struct PoolProvider {
    pool: Arc<BrowserPool>,
}

#[async_trait]
impl ResourceProvider for PoolProvider {
    type Resource = PooledPage;

    async fn acquire(&self) -> anyhow::Result<PooledPage> {
        Ok(self.pool.acquire_page(&AcquireOptions::default()).await?)
    }

    async fn release(&self, page: PooledPage) -> anyhow::Result<()> {
        page.close().await;
        Ok(())
    }
}

/// A paced audit: waits for a rate-limit slot, then inspects the page.
struct PacedAudit {
    limiter: Arc<RateLimiter>,
    invocations: AtomicUsize,
}

#[async_trait]
impl AuditOperation for PacedAudit {
    type Resource = PooledPage;
    type Output = String;

    async fn run(&self, lead_id: &LeadId, page: &PooledPage) -> anyhow::Result<String> {
        self.limiter.wait_for_slot().await?;
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let url = page.page().url().await.map_err(anyhow::Error::from)?;
        Ok(format!("{lead_id}: {}", url.unwrap_or_default()))
    }
}

fn leads(count: usize) -> Vec<LeadId> {
    (1..=count)
        .map(|i| LeadId::new(format!("lead-{i}")).expect("valid id"))
        .collect()
}

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimiterConfig {
        min_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(200),
        enable_jitter: false,
        jitter_factor: 0.0,
        bucket: TokenBucketConfig {
            capacity: 100.0,
            refill_rate: 10.0,
            refill_interval: Duration::from_millis(100),
            initial_tokens: None,
        },
    }))
}

#[tokio::test(start_paused = true)]
async fn test_batch_over_pool_with_pacing() {
    let pool = Arc::new(BrowserPool::new(
        PoolConfig {
            max_entries: 2,
            max_contexts_per_entry: 3,
            entry_idle_timeout: Duration::from_secs(300),
            context_idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        },
        Arc::new(StubFactory),
    ));
    let provider = PoolProvider { pool: pool.clone() };

    let runner = AuditRunner::new(
        RetryConfig::default(),
        CircuitBreakerConfig::default(),
        Duration::from_secs(30),
    );
    let operation = PacedAudit {
        limiter: limiter(),
        invocations: AtomicUsize::new(0),
    };

    let monitor = RequestMonitor::new(RequestMonitorConfig::default());

    let ids = leads(4);
    let batch = runner
        .run_batch(&ids, &provider, &operation, &BatchOptions::default())
        .await;

    assert_eq!(batch.total, 4);
    assert_eq!(batch.successful, 4);
    assert_eq!(batch.partial, 0);
    assert_eq!(batch.failed, 0);
    assert!(!batch.circuit_tripped);
    assert_eq!(operation.invocations.load(Ordering::SeqCst), 4);

    // Feed outcomes to the monitor the way the composition root does
    for id in &ids {
        let outcome = match batch.results[id].as_partial() {
            None => RequestOutcome::Success,
            Some(partial) => RequestOutcome::from(partial.kind),
        };
        monitor.record_outcome(outcome);
    }
    assert_eq!(monitor.stats().history_len, 4);
    assert_eq!(monitor.stats().success_rate, 1.0);

    // Every page went back: nothing is held after the batch
    let stats = pool.stats();
    assert_eq!(stats.active_contexts, 0);
    assert!(stats.total_entries <= 2);

    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_surfaces_as_failed_items() {
    // A pool with a single slot that is never released by an outside holder
    let pool = Arc::new(BrowserPool::new(
        PoolConfig {
            max_entries: 1,
            max_contexts_per_entry: 1,
            entry_idle_timeout: Duration::from_secs(300),
            context_idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(100),
        },
        Arc::new(StubFactory),
    ));
    let held = pool
        .acquire_page(&AcquireOptions::default())
        .await
        .expect("hold the only slot");

    let provider = PoolProvider { pool: pool.clone() };
    let runner = AuditRunner::new(
        RetryConfig::default(),
        CircuitBreakerConfig::default(),
        Duration::from_secs(30),
    );
    let operation = PacedAudit {
        limiter: limiter(),
        invocations: AtomicUsize::new(0),
    };

    let ids = leads(2);
    let batch = runner
        .run_batch(&ids, &provider, &operation, &BatchOptions::default())
        .await;

    assert_eq!(batch.failed, 2);
    assert_eq!(batch.successful, 0);
    assert_eq!(operation.invocations.load(Ordering::SeqCst), 0);
    assert!(batch.errors["lead-1"].contains("capacity"));

    held.close().await;
    pool.shutdown().await;
}
