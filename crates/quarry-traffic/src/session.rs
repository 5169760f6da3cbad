//! Session lifecycle and robots.txt compliance.
//!
//! A session is one browsing identity: rotate it after enough requests or
//! enough age and the next one starts clean. Rotation only happens when the
//! owner asks for it, never in the middle of an operation. The manager also
//! caches robots.txt rules per domain and owns the escalating backoff used
//! after blocks.

use crate::backoff::BackoffCalculator;
use crate::error::{Result, TrafficError};
use crate::robots::{domain_of, parse_robots, RobotsRules};
use async_trait::async_trait;
use quarry_core::config::SessionSettings;
use quarry_core::Timestamp;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Cached robots.txt rules expire after this long.
const ROBOTS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// User agent presented when fetching robots.txt.
const ROBOTS_USER_AGENT: &str = "quarrybot";

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rotate the session after this many requests
    pub rotate_after_requests: u32,
    /// Rotate the session after this age
    pub max_session_age: Duration,
    /// Clear cookies on rotation
    pub clear_cookies: bool,
    /// Use incognito browser contexts
    pub use_incognito: bool,
    /// Honor robots.txt disallow rules and crawl delays
    pub respect_robots_txt: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            rotate_after_requests: settings.rotate_after_requests,
            max_session_age: Duration::from_millis(settings.max_session_age_ms),
            clear_cookies: settings.clear_cookies,
            use_incognito: settings.use_incognito,
            respect_robots_txt: settings.respect_robots_txt,
        }
    }
}

/// One browsing identity.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Session identifier
    pub id: String,
    /// Wall-clock creation time
    pub created_at: Timestamp,
    /// Requests made under this session
    pub request_count: u32,
    /// Wall-clock time of the last request
    pub last_request_at: Option<Timestamp>,
    /// Cookies accumulated (reported by the browser layer)
    pub cookie_count: u32,
    #[serde(skip)]
    created: Instant,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Timestamp::now(),
            request_count: 0,
            last_request_at: None,
            cookie_count: 0,
            created: Instant::now(),
        }
    }

    /// Age of this session.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

/// Fetches robots.txt content. Implemented by the HTTP layer; the default
/// [`HttpRobotsFetcher`] uses reqwest.
#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    /// Fetch the body at `url`.
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// reqwest-backed robots.txt fetcher.
#[derive(Debug, Default)]
pub struct HttpRobotsFetcher {
    client: reqwest::Client,
}

impl HttpRobotsFetcher {
    /// Create a fetcher with a dedicated client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RobotsFetcher for HttpRobotsFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", ROBOTS_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[derive(Debug)]
struct CachedRobots {
    rules: RobotsRules,
    fetched: Instant,
}

/// Stats snapshot for the session layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub request_count: u32,
    pub session_age_ms: u64,
    pub rotations: u64,
    pub cached_domains: usize,
    pub consecutive_blocks: u32,
}

/// Session lifecycle, robots.txt cache, and block backoff.
pub struct SessionManager {
    config: SessionConfig,
    fetcher: Arc<dyn RobotsFetcher>,
    session: Mutex<SessionState>,
    robots_cache: Mutex<HashMap<String, CachedRobots>>,
    backoff: Mutex<BackoffCalculator>,
    rotations: Mutex<u64>,
}

impl SessionManager {
    /// Create a manager with the default HTTP fetcher.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_fetcher(config, Arc::new(HttpRobotsFetcher::new()))
    }

    /// Create a manager with an injected robots.txt fetcher.
    #[must_use]
    pub fn with_fetcher(config: SessionConfig, fetcher: Arc<dyn RobotsFetcher>) -> Self {
        Self {
            config,
            fetcher,
            session: Mutex::new(SessionState::fresh()),
            robots_cache: Mutex::new(HashMap::new()),
            backoff: Mutex::new(BackoffCalculator::default()),
            rotations: Mutex::new(0),
        }
    }

    /// Snapshot of the active session.
    #[must_use]
    pub fn current_session(&self) -> SessionState {
        self.session.lock().expect("session lock poisoned").clone()
    }

    /// Record one request against the active session.
    pub fn record_request(&self) {
        let mut session = self.session.lock().expect("session lock poisoned");
        session.request_count += 1;
        session.last_request_at = Some(Timestamp::now());
    }

    /// Report the browser layer's current cookie count.
    pub fn record_cookie_count(&self, count: u32) {
        let mut session = self.session.lock().expect("session lock poisoned");
        session.cookie_count = count;
    }

    /// True iff the session hit the request-count or age threshold.
    #[must_use]
    pub fn should_rotate(&self) -> bool {
        let session = self.session.lock().expect("session lock poisoned");
        session.request_count >= self.config.rotate_after_requests
            || session.age() >= self.config.max_session_age
    }

    /// Replace the active session, returning the prior one for teardown
    /// (cookie clearing, context disposal).
    pub fn rotate(&self) -> SessionState {
        let mut session = self.session.lock().expect("session lock poisoned");
        let prior = std::mem::replace(&mut *session, SessionState::fresh());
        *self.rotations.lock().expect("rotations lock poisoned") += 1;
        tracing::info!(
            "Session rotated: {} ({} requests, {:?} old) -> {}",
            prior.id,
            prior.request_count,
            prior.age(),
            session.id
        );
        prior
    }

    /// Whether rotation should clear cookies (config passthrough for the
    /// browser layer).
    #[must_use]
    pub fn clears_cookies(&self) -> bool {
        self.config.clear_cookies
    }

    /// Whether sessions use incognito contexts.
    #[must_use]
    pub fn uses_incognito(&self) -> bool {
        self.config.use_incognito
    }

    /// Rules for a domain, fetched through the cache (1 hour TTL).
    ///
    /// Permissive when compliance is disabled or the fetch fails (a site
    /// without robots.txt allows everything).
    pub async fn robots_for(&self, domain: &str) -> RobotsRules {
        if !self.config.respect_robots_txt {
            return RobotsRules::permissive();
        }

        {
            let cache = self.robots_cache.lock().expect("robots lock poisoned");
            if let Some(cached) = cache.get(domain) {
                if cached.fetched.elapsed() < ROBOTS_CACHE_TTL {
                    return cached.rules.clone();
                }
            }
        }

        match self.refresh_robots(domain).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::debug!("{e}");
                let rules = RobotsRules::permissive();
                self.cache_rules(domain, rules.clone());
                rules
            }
        }
    }

    /// Fetch, parse, and cache fresh rules for a domain, bypassing the
    /// cache. Unlike [`Self::robots_for`] this does not fall back to
    /// permissive rules, so compliance checks can distinguish "no
    /// robots.txt rules" from "could not ask".
    ///
    /// # Errors
    /// Returns [`TrafficError::RobotsFetch`] when the fetch fails.
    pub async fn refresh_robots(&self, domain: &str) -> Result<RobotsRules> {
        let url = format!("https://{domain}/robots.txt");
        let content =
            self.fetcher
                .fetch(&url)
                .await
                .map_err(|e| TrafficError::RobotsFetch {
                    domain: domain.to_string(),
                    reason: format!("{e:#}"),
                })?;
        let rules = parse_robots(&content, ROBOTS_USER_AGENT);
        self.cache_rules(domain, rules.clone());
        Ok(rules)
    }

    fn cache_rules(&self, domain: &str, rules: RobotsRules) {
        let mut cache = self.robots_cache.lock().expect("robots lock poisoned");
        cache.insert(
            domain.to_string(),
            CachedRobots {
                rules,
                fetched: Instant::now(),
            },
        );
    }

    /// Whether a full URL may be crawled.
    ///
    /// # Errors
    /// Returns [`TrafficError::InvalidUrl`] when the URL cannot be parsed.
    pub async fn is_url_allowed(&self, url: &str) -> Result<bool> {
        let domain = domain_of(url)?;
        let parsed =
            url::Url::parse(url).map_err(|e| TrafficError::InvalidUrl(e.to_string()))?;
        let rules = self.robots_for(&domain).await;
        Ok(rules.is_path_allowed(parsed.path()))
    }

    /// The site-declared crawl delay for a domain, if any.
    pub async fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        self.robots_for(domain).await.crawl_delay
    }

    /// Record a block and return the escalated wait before continuing.
    pub fn record_block(&self) -> Duration {
        self.backoff
            .lock()
            .expect("backoff lock poisoned")
            .record_failure()
    }

    /// Record a successful request, resetting block escalation.
    pub fn record_recovery(&self) {
        self.backoff
            .lock()
            .expect("backoff lock poisoned")
            .record_success();
    }

    /// Stats snapshot.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let session = self.session.lock().expect("session lock poisoned");
        SessionStats {
            session_id: session.id.clone(),
            request_count: session.request_count,
            session_age_ms: session.age().as_millis() as u64,
            rotations: *self.rotations.lock().expect("rotations lock poisoned"),
            cached_domains: self
                .robots_cache
                .lock()
                .expect("robots lock poisoned")
                .len(),
            consecutive_blocks: self
                .backoff
                .lock()
                .expect("backoff lock poisoned")
                .consecutive_failures(),
        }
    }
}
