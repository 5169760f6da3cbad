//! The chromiumoxide client and its pool-facing factory.

use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintProfile;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use quarry_core::config::BrowserSettings;
use quarry_pool::{
    AcquireOptions, AutomationClient, ClientFactory, ContextHandle, PageHandle, PoolError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

fn client_err(e: impl std::fmt::Display) -> PoolError {
    PoolError::Client(e.to_string())
}

/// One running Chrome process plus the CDP transport to it.
pub struct ChromiumClient {
    browser: Arc<Mutex<Browser>>,
    connected: Arc<AtomicBool>,
    fingerprint: FingerprintProfile,
}

impl ChromiumClient {
    /// Launch a browser with a freshly randomized fingerprint.
    ///
    /// # Errors
    /// Returns [`BrowserError::Launch`] when the process cannot be started
    /// or the CDP handshake fails.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        Self::launch_with_fingerprint(settings, FingerprintProfile::randomized()).await
    }

    /// Launch a browser presenting a specific fingerprint.
    pub async fn launch_with_fingerprint(
        settings: &BrowserSettings,
        fingerprint: FingerprintProfile,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height);
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let alive = connected.clone();
        // The handler stream ends when the browser process or its websocket
        // goes away; that is the liveness signal the pool scans for.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
            alive.store(false, Ordering::SeqCst);
            tracing::debug!("Browser CDP handler ended");
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            connected,
            fingerprint,
        })
    }

    /// The fingerprint this client presents.
    #[must_use]
    pub fn fingerprint(&self) -> &FingerprintProfile {
        &self.fingerprint
    }
}

#[async_trait]
impl AutomationClient for ChromiumClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn create_context(
        &self,
        _options: &AcquireOptions,
    ) -> quarry_pool::Result<Box<dyn ContextHandle>> {
        let browser = self.browser.lock().await;
        let resp = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(client_err)?;
        let context_id = resp.browser_context_id.clone();
        Ok(Box::new(ChromiumContext {
            browser: self.browser.clone(),
            context_id,
        }))
    }

    async fn create_page(
        &self,
        options: &AcquireOptions,
    ) -> quarry_pool::Result<Box<dyn PageHandle>> {
        let page = {
            let browser = self.browser.lock().await;
            if options.incognito {
                let ctx = browser
                    .execute(CreateBrowserContextParams::default())
                    .await
                    .map_err(client_err)?;
                let params = CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(ctx.browser_context_id.clone())
                    .build()
                    .map_err(PoolError::Client)?;
                browser.new_page(params).await.map_err(client_err)?
            } else {
                browser.new_page("about:blank").await.map_err(client_err)?
            }
        };

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| self.fingerprint.user_agent.clone());
        page.set_user_agent(user_agent).await.map_err(client_err)?;

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn disconnect(&self) -> quarry_pool::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(client_err)?;
        // Reap the process; failures here leave at worst a zombie entry
        let _ = browser.wait().await;
        Ok(())
    }
}

struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    context_id: BrowserContextId,
}

#[async_trait]
impl ContextHandle for ChromiumContext {
    async fn close(&self) -> quarry_pool::Result<()> {
        let browser = self.browser.lock().await;
        browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await
            .map_err(client_err)?;
        Ok(())
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    async fn url(&self) -> quarry_pool::Result<Option<String>> {
        self.page.url().await.map_err(client_err)
    }

    async fn close(&self) -> quarry_pool::Result<()> {
        self.page.clone().close().await.map_err(client_err)
    }
}

/// Launches [`ChromiumClient`]s on the pool's behalf.
pub struct ChromiumFactory {
    settings: BrowserSettings,
}

impl ChromiumFactory {
    #[must_use]
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClientFactory for ChromiumFactory {
    async fn connect(&self) -> quarry_pool::Result<Arc<dyn AutomationClient>> {
        let client = ChromiumClient::launch(&self.settings).await?;
        Ok(Arc::new(client))
    }
}
