//! Bounded pool of heavyweight browser automation clients.
//!
//! Launching a browser costs seconds and hundreds of megabytes; a context or
//! page inside one costs almost nothing. The pool keeps a small number of
//! connected clients alive, hands out contexts/pages up to a per-client cap,
//! wakes waiters on release, and evicts clients that sit idle — never the
//! last one, so the next batch doesn't pay the cold-start price.

pub mod client;
pub mod error;
pub mod pool;

pub use client::{AcquireOptions, AutomationClient, ClientFactory, ContextHandle, PageHandle};
pub use error::{PoolError, Result};
pub use pool::{BrowserPool, PoolConfig, PoolStats, PooledContext, PooledPage};
