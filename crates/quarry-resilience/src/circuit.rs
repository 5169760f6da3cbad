//! Circuit breaker for failing third-party sites.
//!
//! # States
//! - Closed: calls pass through, consecutive failures counted
//! - Open: calls fail fast without invoking the protected function
//! - Half-Open: limited probe window after the cool-down
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_threshold consecutive failures
//! Open → Half-Open: after `timeout` elapses
//! Half-Open → Closed: success_threshold consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! Transitions are published on a broadcast channel for observability only;
//! nothing in the pipeline keys control flow off the events.

use crate::error::CircuitError;
use quarry_core::config::CircuitSettings;
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing fast
    Open,
    /// Probing for recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit from closed
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it
    pub success_threshold: u32,
    /// Open-state cool-down before the first half-open probe
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitSettings::default())
    }
}

impl From<&CircuitSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

/// State transition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Stats snapshot for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the last state transition
    pub since_transition_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
}

/// Three-state failure-isolation gate around a protected call.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<StateChange>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                last_transition: Instant::now(),
            }),
            events,
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// # Errors
    /// Returns [`CircuitError::Open`] without invoking the operation while
    /// the circuit is open, or [`CircuitError::Operation`] wrapping the
    /// operation's own failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // Admission check; lock is not held across the await below.
        {
            let mut inner = self.inner.lock().expect("circuit lock poisoned");
            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                } else {
                    return Err(CircuitError::Open {
                        retry_in: self.config.timeout - elapsed,
                    });
                }
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Current state, advancing open → half-open if the cool-down elapsed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.config.timeout {
                self.transition(&mut inner, CircuitState::HalfOpen);
            }
        }
        inner.state
    }

    /// Force the breaker back to closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Subscribe to state-change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Stats snapshot.
    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock().expect("circuit lock poisoned");
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            since_transition_ms: inner.last_transition.elapsed().as_millis() as u64,
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.success_count = 0;
        inner.last_transition = Instant::now();
        tracing::warn!("Circuit breaker transition: {} -> {}", from, to);
        let _ = self.events.send(StateChange { from, to });
    }
}
