//! The bounded browser pool.
//!
//! Acquisition is first-fit: scan current entries for a connected client
//! with a spare context slot, create a new client if under the cap, else
//! wait. Waiting uses a notification from `release` rather than polling,
//! bounded by `acquire_timeout`. There is no FIFO fairness among waiters: a
//! later caller can win a freed slot if it scans first. Acceptable at this
//! workload's volumes.

use crate::client::{AcquireOptions, AutomationClient, ClientFactory, ContextHandle, PageHandle};
use crate::error::{PoolError, Result};
use quarry_core::config::PoolSettings;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum heavyweight clients
    pub max_entries: usize,
    /// Maximum contexts/pages per client
    pub max_contexts_per_entry: usize,
    /// Evict a zero-active client idle longer than this
    pub entry_idle_timeout: Duration,
    /// Idle sweep interval
    pub context_idle_timeout: Duration,
    /// Bounded wait for a slot
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_entries: settings.max_entries.max(1),
            max_contexts_per_entry: settings.max_contexts_per_entry.max(1),
            entry_idle_timeout: Duration::from_millis(settings.entry_idle_timeout_ms),
            context_idle_timeout: Duration::from_millis(settings.context_idle_timeout_ms),
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
        }
    }
}

/// Stats snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_entries: usize,
    pub active_contexts: usize,
    pub idle_entries: usize,
    pub pending_creations: usize,
    pub max_entries: usize,
    pub draining: bool,
}

struct Entry {
    id: u64,
    client: Arc<dyn AutomationClient>,
    active: AtomicUsize,
    last_used: Mutex<Instant>,
}

impl Entry {
    fn new(id: u64, client: Arc<dyn AutomationClient>, active: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            client,
            active: AtomicUsize::new(active),
            last_used: Mutex::new(Instant::now()),
        })
    }

    fn touch(&self) {
        *self.last_used.lock().expect("entry lock poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .expect("entry lock poisoned")
            .elapsed()
    }

    /// Decrement the active counter, clamping at zero.
    fn release_slot(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.touch();
    }
}

struct PoolState {
    entries: Vec<Arc<Entry>>,
    pending: usize,
    draining: bool,
    next_id: u64,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ClientFactory>,
    state: Mutex<PoolState>,
    notify: Notify,
}

enum Plan {
    Use(Arc<Entry>),
    Create,
    Wait,
}

impl PoolInner {
    /// One sweep pass: evict zero-active entries that are disconnected or
    /// idle past the timeout. The activity check happens under the state
    /// lock, immediately before removal, so a concurrently-starting
    /// acquisition (which reserves its slot under the same lock) cannot
    /// lose its entry. The sole remaining entry is never evicted.
    async fn sweep(&self) {
        let victims: Vec<Arc<Entry>> = {
            let mut state = self.state.lock().expect("pool lock poisoned");
            if state.draining {
                return;
            }
            let mut victims = Vec::new();
            let mut i = 0;
            while i < state.entries.len() {
                if state.entries.len() <= 1 {
                    break;
                }
                let entry = &state.entries[i];
                let evictable = entry.active.load(Ordering::SeqCst) == 0
                    && (!entry.client.is_connected()
                        || entry.idle_for() > self.config.entry_idle_timeout);
                if evictable {
                    victims.push(state.entries.remove(i));
                } else {
                    i += 1;
                }
            }
            victims
        };

        for entry in victims {
            tracing::debug!("Evicting idle pool entry {}", entry.id);
            if let Err(e) = entry.client.disconnect().await {
                tracing::debug!("Ignoring disconnect error during eviction: {}", e);
            }
        }
    }
}

/// Owning guard for a pooled context. Releasing (explicitly or on drop)
/// decrements the entry's counter exactly once and wakes one waiter.
pub struct PooledContext {
    handle: Box<dyn ContextHandle>,
    slot: SlotGuard,
}

impl PooledContext {
    /// The underlying context.
    #[must_use]
    pub fn context(&self) -> &dyn ContextHandle {
        self.handle.as_ref()
    }

    /// Close the browser-side context (errors swallowed) and release the
    /// pool slot.
    pub async fn close(self) {
        if let Err(e) = self.handle.close().await {
            tracing::debug!("Ignoring context close error: {}", e);
        }
        self.slot.release();
    }
}

/// Owning guard for a pooled page. Same release semantics as
/// [`PooledContext`].
pub struct PooledPage {
    handle: Box<dyn PageHandle>,
    slot: SlotGuard,
}

impl PooledPage {
    /// The underlying page.
    #[must_use]
    pub fn page(&self) -> &dyn PageHandle {
        self.handle.as_ref()
    }

    /// Close the browser-side page (errors swallowed) and release the pool
    /// slot.
    pub async fn close(self) {
        if let Err(e) = self.handle.close().await {
            tracing::debug!("Ignoring page close error: {}", e);
        }
        self.slot.release();
    }
}

struct SlotGuard {
    entry: Arc<Entry>,
    inner: Arc<PoolInner>,
    released: AtomicBool,
}

impl SlotGuard {
    fn new(entry: Arc<Entry>, inner: Arc<PoolInner>) -> Self {
        Self {
            entry,
            inner,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.entry.release_slot();
            self.inner.notify.notify_one();
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Bounded pool of automation clients.
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

impl BrowserPool {
    /// Create a pool and start its idle sweep.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(config: PoolConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            factory,
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                pending: 0,
                draining: false,
                next_id: 0,
            }),
            notify: Notify::new(),
        });

        let weak = Arc::downgrade(&inner);
        let interval = inner.config.context_idle_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.state.lock().expect("pool lock poisoned").draining {
                    break;
                }
                inner.sweep().await;
            }
        });

        Self { inner }
    }

    /// Acquire a page, creating or waiting for capacity as needed.
    ///
    /// # Errors
    /// - [`PoolError::ShuttingDown`] after `shutdown()`
    /// - [`PoolError::AcquireTimeout`] when no slot frees up in time
    /// - [`PoolError::Client`] when the client fails to mint the page
    pub async fn acquire_page(&self, options: &AcquireOptions) -> Result<PooledPage> {
        let entry = self.acquire_entry().await?;
        match entry.client.create_page(options).await {
            Ok(handle) => Ok(PooledPage {
                handle,
                slot: SlotGuard::new(entry, self.inner.clone()),
            }),
            Err(e) => {
                entry.release_slot();
                self.inner.notify.notify_one();
                Err(e)
            }
        }
    }

    /// Acquire a context. Same capacity semantics as [`Self::acquire_page`].
    pub async fn acquire_context(&self, options: &AcquireOptions) -> Result<PooledContext> {
        let entry = self.acquire_entry().await?;
        match entry.client.create_context(options).await {
            Ok(handle) => Ok(PooledContext {
                handle,
                slot: SlotGuard::new(entry, self.inner.clone()),
            }),
            Err(e) => {
                entry.release_slot();
                self.inner.notify.notify_one();
                Err(e)
            }
        }
    }

    /// Reserve a context slot on some entry, creating a client if the pool
    /// is under its cap. The slot is reserved (counter incremented) before
    /// this returns; callers must release it on any failure path.
    async fn acquire_entry(&self) -> Result<Arc<Entry>> {
        let inner = &self.inner;
        let started = Instant::now();

        loop {
            let plan = {
                let mut state = inner.state.lock().expect("pool lock poisoned");
                if state.draining {
                    return Err(PoolError::ShuttingDown);
                }

                let candidate = state
                    .entries
                    .iter()
                    .find(|e| {
                        e.client.is_connected()
                            && e.active.load(Ordering::SeqCst)
                                < inner.config.max_contexts_per_entry
                    })
                    .cloned();

                if let Some(entry) = candidate {
                    // Reserve under the lock so the sweep cannot evict it
                    entry.active.fetch_add(1, Ordering::SeqCst);
                    entry.touch();
                    Plan::Use(entry)
                } else if state.entries.len() + state.pending < inner.config.max_entries {
                    state.pending += 1;
                    Plan::Create
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Use(entry) => return Ok(entry),
                Plan::Create => return self.create_entry().await,
                Plan::Wait => {
                    let waited = started.elapsed();
                    let Some(remaining) = inner.config.acquire_timeout.checked_sub(waited)
                    else {
                        return Err(PoolError::AcquireTimeout { waited });
                    };
                    if tokio::time::timeout(remaining, inner.notify.notified())
                        .await
                        .is_err()
                    {
                        return Err(PoolError::AcquireTimeout {
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    /// Connect a new client for a reservation made in `acquire_entry`.
    async fn create_entry(&self) -> Result<Arc<Entry>> {
        let inner = &self.inner;
        let connected = inner.factory.connect().await;

        let orphan = {
            let mut state = inner.state.lock().expect("pool lock poisoned");
            state.pending -= 1;
            match connected {
                // Shutdown raced the connect; the client is not tracked
                Ok(client) if state.draining => client,
                Ok(client) => {
                    let id = state.next_id;
                    state.next_id += 1;
                    let entry = Entry::new(id, client, 1);
                    state.entries.push(entry.clone());
                    tracing::debug!(
                        "Created pool entry {} ({}/{})",
                        id,
                        state.entries.len(),
                        inner.config.max_entries
                    );
                    return Ok(entry);
                }
                Err(e) => {
                    drop(state);
                    // Another waiter may now use the freed creation slot
                    inner.notify.notify_one();
                    return Err(e);
                }
            }
        };

        let _ = orphan.disconnect().await;
        Err(PoolError::ShuttingDown)
    }

    /// Pre-create up to `min(n, max_entries - current)` clients in parallel.
    ///
    /// Returns how many were created; individual connect failures are
    /// logged and skipped.
    pub async fn warm_up(&self, n: usize) -> Result<usize> {
        let to_create = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            if state.draining {
                return Err(PoolError::ShuttingDown);
            }
            let capacity = self
                .inner
                .config
                .max_entries
                .saturating_sub(state.entries.len() + state.pending);
            let k = n.min(capacity);
            state.pending += k;
            k
        };

        let results = futures::future::join_all(
            (0..to_create).map(|_| self.inner.factory.connect()),
        )
        .await;

        let created = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            state.pending -= to_create;
            let mut created = 0;
            for result in results {
                match result {
                    Ok(client) => {
                        let id = state.next_id;
                        state.next_id += 1;
                        state.entries.push(Entry::new(id, client, 0));
                        created += 1;
                    }
                    Err(e) => tracing::warn!("Warm-up connect failed: {}", e),
                }
            }
            created
        };

        if created > 0 {
            self.inner.notify.notify_waiters();
        }
        Ok(created)
    }

    /// Drain the pool: reject new acquisitions, wake all waiters, and
    /// disconnect every entry best-effort.
    pub async fn shutdown(&self) {
        let entries = {
            let mut state = self.inner.state.lock().expect("pool lock poisoned");
            state.draining = true;
            std::mem::take(&mut state.entries)
        };
        self.inner.notify.notify_waiters();

        for entry in entries {
            if let Err(e) = entry.client.disconnect().await {
                tracing::debug!("Ignoring disconnect error during shutdown: {}", e);
            }
        }
        tracing::info!("Browser pool shut down");
    }

    /// Stats snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        let active: usize = state
            .entries
            .iter()
            .map(|e| e.active.load(Ordering::SeqCst))
            .sum();
        let idle = state
            .entries
            .iter()
            .filter(|e| e.active.load(Ordering::SeqCst) == 0)
            .count();
        PoolStats {
            total_entries: state.entries.len(),
            active_contexts: active,
            idle_entries: idle,
            pending_creations: state.pending,
            max_entries: self.inner.config.max_entries,
            draining: state.draining,
        }
    }
}
