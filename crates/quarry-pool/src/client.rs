//! Seams between the pool and the browser layer.
//!
//! The pool never talks to a concrete browser; it manages anything that can
//! connect, report liveness, and mint contexts/pages. quarry-browser provides
//! the chromiumoxide implementation.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Options for creating a context or page.
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Create inside an incognito context
    pub incognito: bool,
    /// Override the client's user agent for this context/page
    pub user_agent: Option<String>,
}

/// A lightweight browsing context hosted by a client.
#[async_trait]
pub trait ContextHandle: Send + Sync {
    /// Close the context, releasing browser-side resources.
    async fn close(&self) -> Result<()>;
}

/// A single page hosted by a client.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// The page's current URL, if navigation has happened.
    async fn url(&self) -> Result<Option<String>>;

    /// Close the page, releasing browser-side resources.
    async fn close(&self) -> Result<()>;
}

/// One heavyweight automation client (a running browser process).
#[async_trait]
pub trait AutomationClient: Send + Sync {
    /// Whether the client's transport is still alive.
    fn is_connected(&self) -> bool;

    /// Create a lightweight context.
    async fn create_context(&self, options: &AcquireOptions) -> Result<Box<dyn ContextHandle>>;

    /// Create a page.
    async fn create_page(&self, options: &AcquireOptions) -> Result<Box<dyn PageHandle>>;

    /// Tear the client down. Errors are swallowed by pool shutdown.
    async fn disconnect(&self) -> Result<()>;
}

/// Launches and connects new clients on the pool's behalf.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Launch a client and wait until it is connected.
    async fn connect(&self) -> Result<Arc<dyn AutomationClient>>;
}
