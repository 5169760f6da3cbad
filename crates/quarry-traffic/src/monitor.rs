//! Sliding-window request accounting and block detection.
//!
//! Every outcome from the audit loop lands here. Rates are computed over a
//! sliding window, block patterns (rate over threshold, consecutive blocks)
//! raise alerts, and each alert type is debounced so a persistent condition
//! does not spam the registered callbacks.

use quarry_core::{FailureKind, Timestamp};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// An alert type fires at most once per this window.
const ALERT_DEBOUNCE: Duration = Duration::from_secs(30);

/// How many trailing blocked outcomes count as a pattern.
const CONSECUTIVE_BLOCK_PATTERN: usize = 3;

/// Outcome of a single outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Success,
    Failure,
    Blocked,
    Timeout,
    Error,
}

impl RequestOutcome {
    fn is_success(self) -> bool {
        self == Self::Success
    }

    fn is_blocked(self) -> bool {
        self == Self::Blocked
    }
}

/// Map a classified failure onto the monitor's outcome vocabulary, so the
/// audit loop and the monitor share one taxonomy.
impl From<FailureKind> for RequestOutcome {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Blocked => Self::Blocked,
            FailureKind::Timeout => Self::Timeout,
            FailureKind::NonRetryable | FailureKind::CircuitOpen => Self::Failure,
            FailureKind::Transient | FailureKind::Unknown => Self::Error,
        }
    }
}

/// One request observation.
#[derive(Debug, Clone, Default)]
pub struct RequestRecord {
    /// URL requested, when known
    pub url: Option<String>,
    /// HTTP status, when one was received
    pub status: Option<u16>,
    /// Request duration
    pub duration: Option<Duration>,
    /// Free-form context for triage
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug)]
struct Entry {
    outcome: RequestOutcome,
    recorded: Instant,
    #[allow(dead_code)]
    at: Timestamp,
    record: RequestRecord,
}

/// Alert categories, each independently debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Windowed block rate exceeded the threshold
    HighBlockRate,
    /// Windowed failure rate exceeded the threshold
    HighFailureRate,
    /// The last several requests were all blocked
    ConsecutiveBlocks,
}

/// Alert delivered to registered callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorAlert {
    pub alert_type: AlertType,
    pub message: String,
    /// The rate that tripped the alert
    pub current_rate: f64,
    /// The configured threshold it crossed
    pub threshold: f64,
    pub at: Timestamp,
    /// Windowed request count when the alert fired
    pub recent_requests: usize,
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct RequestMonitorConfig {
    /// Sliding window for rate computation
    pub window: Duration,
    /// Maximum history entries retained
    pub max_history_size: usize,
    /// Block rate that triggers an alert
    pub block_alert_threshold: f64,
    /// Failure rate that triggers an alert
    pub failure_alert_threshold: f64,
    /// Minimum windowed requests before rates are meaningful
    pub min_requests_for_rates: usize,
}

impl Default for RequestMonitorConfig {
    fn default() -> Self {
        Self::from(&quarry_core::config::MonitorSettings::default())
    }
}

impl From<&quarry_core::config::MonitorSettings> for RequestMonitorConfig {
    fn from(settings: &quarry_core::config::MonitorSettings) -> Self {
        Self {
            window: Duration::from_millis(settings.window_ms),
            max_history_size: settings.max_history_size,
            block_alert_threshold: settings.block_alert_threshold,
            failure_alert_threshold: settings.failure_alert_threshold,
            min_requests_for_rates: settings.min_requests_for_rates,
        }
    }
}

/// Stats snapshot over the sliding window.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    /// Entries currently retained (capped)
    pub history_len: usize,
    /// Entries inside the window
    pub windowed: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub block_rate: f64,
}

#[derive(Default)]
struct MonitorInner {
    history: VecDeque<Entry>,
    last_alert: HashMap<AlertType, Instant>,
}

type AlertCallback = Box<dyn Fn(&MonitorAlert) + Send + Sync>;

/// Sliding-window success/failure/block accounting with debounced alerting.
pub struct RequestMonitor {
    config: RequestMonitorConfig,
    inner: Mutex<MonitorInner>,
    callbacks: Mutex<Vec<AlertCallback>>,
}

impl RequestMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new(config: RequestMonitorConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(MonitorInner::default()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register an alert callback.
    pub fn on_alert(&self, callback: impl Fn(&MonitorAlert) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("callback lock poisoned")
            .push(Box::new(callback));
    }

    /// Record a request outcome and evaluate alert conditions.
    ///
    /// Returns the alerts that fired (already delivered to callbacks).
    pub fn record(&self, outcome: RequestOutcome, record: RequestRecord) -> Vec<MonitorAlert> {
        let alerts = {
            let mut inner = self.inner.lock().expect("monitor lock poisoned");
            inner.history.push_back(Entry {
                outcome,
                recorded: Instant::now(),
                at: Timestamp::now(),
                record,
            });
            while inner.history.len() > self.config.max_history_size {
                inner.history.pop_front();
            }
            self.evaluate(&mut inner)
        };

        if !alerts.is_empty() {
            let callbacks = self.callbacks.lock().expect("callback lock poisoned");
            for alert in &alerts {
                tracing::warn!(
                    "Monitor alert {:?}: {} (rate {:.2} > {:.2})",
                    alert.alert_type,
                    alert.message,
                    alert.current_rate,
                    alert.threshold
                );
                for callback in callbacks.iter() {
                    callback(alert);
                }
            }
        }
        alerts
    }

    /// Shorthand for recording a bare outcome.
    pub fn record_outcome(&self, outcome: RequestOutcome) -> Vec<MonitorAlert> {
        self.record(outcome, RequestRecord::default())
    }

    /// Stats snapshot over the current window.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        let windowed: Vec<_> = self.windowed(&inner).collect();
        let total = windowed.len();
        let count =
            |pred: fn(RequestOutcome) -> bool| windowed.iter().filter(|e| pred(e.outcome)).count();

        let rate = |n: usize| {
            if total == 0 {
                0.0
            } else {
                n as f64 / total as f64
            }
        };

        MonitorStats {
            history_len: inner.history.len(),
            windowed: total,
            success_rate: rate(count(RequestOutcome::is_success)),
            failure_rate: rate(windowed.iter().filter(|e| !e.outcome.is_success()).count()),
            block_rate: rate(count(RequestOutcome::is_blocked)),
        }
    }

    /// Most recent windowed request URLs, newest last. Used in alert triage.
    #[must_use]
    pub fn recent_urls(&self, limit: usize) -> Vec<String> {
        let inner = self.inner.lock().expect("monitor lock poisoned");
        self.windowed(&inner)
            .rev()
            .take(limit)
            .filter_map(|e| e.record.url.clone())
            .collect()
    }

    fn windowed<'a>(
        &self,
        inner: &'a MonitorInner,
    ) -> impl DoubleEndedIterator<Item = &'a Entry> {
        let cutoff = Instant::now()
            .checked_sub(self.config.window)
            .unwrap_or_else(Instant::now);
        let window = self.config.window;
        inner
            .history
            .iter()
            .filter(move |e| e.recorded > cutoff || e.recorded.elapsed() < window)
    }

    fn evaluate(&self, inner: &mut MonitorInner) -> Vec<MonitorAlert> {
        let mut alerts = Vec::new();

        let windowed: Vec<(RequestOutcome, Instant)> = self
            .windowed(inner)
            .map(|e| (e.outcome, e.recorded))
            .collect();
        let total = windowed.len();

        if total >= self.config.min_requests_for_rates {
            let blocked = windowed.iter().filter(|(o, _)| o.is_blocked()).count();
            let failed = windowed.iter().filter(|(o, _)| !o.is_success()).count();
            let block_rate = blocked as f64 / total as f64;
            let failure_rate = failed as f64 / total as f64;

            if block_rate > self.config.block_alert_threshold {
                if let Some(alert) = self.make_alert(
                    inner,
                    AlertType::HighBlockRate,
                    format!("block rate {block_rate:.2} over {total} recent requests"),
                    block_rate,
                    self.config.block_alert_threshold,
                    total,
                ) {
                    alerts.push(alert);
                }
            }

            if failure_rate > self.config.failure_alert_threshold {
                if let Some(alert) = self.make_alert(
                    inner,
                    AlertType::HighFailureRate,
                    format!("failure rate {failure_rate:.2} over {total} recent requests"),
                    failure_rate,
                    self.config.failure_alert_threshold,
                    total,
                ) {
                    alerts.push(alert);
                }
            }
        }

        // Pattern detection fires even below the rate gate
        let trailing_blocks = windowed
            .iter()
            .rev()
            .take_while(|(o, _)| o.is_blocked())
            .count();
        if trailing_blocks >= CONSECUTIVE_BLOCK_PATTERN {
            if let Some(alert) = self.make_alert(
                inner,
                AlertType::ConsecutiveBlocks,
                format!("{trailing_blocks} consecutive blocked requests"),
                1.0,
                1.0,
                total,
            ) {
                alerts.push(alert);
            }
        }

        alerts
    }

    /// Build an alert unless its type fired within the debounce window.
    fn make_alert(
        &self,
        inner: &mut MonitorInner,
        alert_type: AlertType,
        message: String,
        current_rate: f64,
        threshold: f64,
        recent_requests: usize,
    ) -> Option<MonitorAlert> {
        if let Some(last) = inner.last_alert.get(&alert_type) {
            if last.elapsed() < ALERT_DEBOUNCE {
                return None;
            }
        }
        inner.last_alert.insert(alert_type, Instant::now());
        Some(MonitorAlert {
            alert_type,
            message,
            current_rate,
            threshold,
            at: Timestamp::now(),
            recent_requests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_outcome_from_failure_kind() {
        assert_eq!(RequestOutcome::from(FailureKind::Blocked), RequestOutcome::Blocked);
        assert_eq!(RequestOutcome::from(FailureKind::Timeout), RequestOutcome::Timeout);
        assert_eq!(RequestOutcome::from(FailureKind::NonRetryable), RequestOutcome::Failure);
        assert_eq!(RequestOutcome::from(FailureKind::CircuitOpen), RequestOutcome::Failure);
        assert_eq!(RequestOutcome::from(FailureKind::Transient), RequestOutcome::Error);
        assert_eq!(RequestOutcome::from(FailureKind::Unknown), RequestOutcome::Error);
    }

    fn config() -> RequestMonitorConfig {
        RequestMonitorConfig {
            window: Duration::from_secs(60),
            max_history_size: 100,
            block_alert_threshold: 0.2,
            failure_alert_threshold: 0.3,
            min_requests_for_rates: 10,
        }
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let monitor = RequestMonitor::new(RequestMonitorConfig {
            max_history_size: 5,
            ..config()
        });

        for _ in 0..20 {
            monitor.record_outcome(RequestOutcome::Success);
        }
        assert_eq!(monitor.stats().history_len, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rates_ignore_entries_outside_window() {
        let monitor = RequestMonitor::new(RequestMonitorConfig {
            window: Duration::from_secs(10),
            ..config()
        });

        for _ in 0..10 {
            monitor.record_outcome(RequestOutcome::Failure);
        }
        tokio::time::sleep(Duration::from_secs(11)).await;

        let stats = monitor.stats();
        assert_eq!(stats.history_len, 10);
        assert_eq!(stats.windowed, 0);
        assert_eq!(stats.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn test_no_rate_alert_below_min_requests() {
        let monitor = RequestMonitor::new(config());
        // 100% blocked but only two requests: ConsecutiveBlocks needs three,
        // rate alerts need ten
        for _ in 0..2 {
            let alerts = monitor.record_outcome(RequestOutcome::Blocked);
            assert!(alerts.is_empty());
        }
    }

    #[tokio::test]
    async fn test_block_rate_alert_fires_once() {
        let monitor = RequestMonitor::new(config());

        for _ in 0..8 {
            monitor.record_outcome(RequestOutcome::Success);
        }
        let alerts = monitor.record_outcome(RequestOutcome::Blocked);
        assert!(alerts.is_empty(), "1/9 blocked is below min_requests gate");

        let alerts = monitor.record_outcome(RequestOutcome::Blocked);
        // 2/10 = 0.2 is not > 0.2 yet
        assert!(alerts.is_empty());

        let alerts = monitor.record_outcome(RequestOutcome::Blocked);
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::HighBlockRate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_debounced_within_thirty_seconds() {
        let monitor = RequestMonitor::new(config());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        monitor.on_alert(move |alert| {
            if alert.alert_type == AlertType::HighFailureRate {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..20 {
            monitor.record_outcome(RequestOutcome::Failure);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1, "debounce suppresses repeats");

        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.record_outcome(RequestOutcome::Failure);
        assert_eq!(fired.load(Ordering::SeqCst), 2, "fires again after debounce");
    }

    #[tokio::test]
    async fn test_consecutive_blocks_pattern() {
        let monitor = RequestMonitor::new(config());

        monitor.record_outcome(RequestOutcome::Blocked);
        monitor.record_outcome(RequestOutcome::Blocked);
        let alerts = monitor.record_outcome(RequestOutcome::Blocked);
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::ConsecutiveBlocks));
    }

    #[tokio::test]
    async fn test_recent_urls_newest_first() {
        let monitor = RequestMonitor::new(config());
        for i in 0..3 {
            monitor.record(
                RequestOutcome::Success,
                RequestRecord {
                    url: Some(format!("https://site{i}.example")),
                    ..Default::default()
                },
            );
        }

        let urls = monitor.recent_urls(2);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://site2.example");
    }

    #[tokio::test]
    async fn test_stats_rates() {
        let monitor = RequestMonitor::new(RequestMonitorConfig {
            min_requests_for_rates: 100,
            ..config()
        });

        for _ in 0..6 {
            monitor.record_outcome(RequestOutcome::Success);
        }
        for _ in 0..2 {
            monitor.record_outcome(RequestOutcome::Blocked);
        }
        monitor.record_outcome(RequestOutcome::Timeout);
        monitor.record_outcome(RequestOutcome::Error);

        let stats = monitor.stats();
        assert_eq!(stats.windowed, 10);
        assert!((stats.success_rate - 0.6).abs() < f64::EPSILON);
        assert!((stats.block_rate - 0.2).abs() < f64::EPSILON);
        assert!((stats.failure_rate - 0.4).abs() < f64::EPSILON);
    }
}
