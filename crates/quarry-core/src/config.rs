//! Configuration management for Quarry.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Every section has sane defaults so a
//! missing or partial config file is never an error.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// Loaded from `~/.config/quarry/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Retry behavior for unreliable operations
    pub retry: RetrySettings,
    /// Circuit breaker thresholds
    pub circuit: CircuitSettings,
    /// Rate limiting and request pacing
    pub rate_limit: RateLimitSettings,
    /// Request monitoring and alerting
    pub monitor: MonitorSettings,
    /// Session rotation and robots.txt compliance
    pub session: SessionSettings,
    /// Browser resource pool sizing
    pub pool: PoolSettings,
    /// Browser automation settings
    pub browser: BrowserSettings,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `QUARRY_POOL_MAX_ENTRIES`: Override pool entry cap
    /// - `QUARRY_HEADLESS`: Override browser headless mode (true/false)
    /// - `QUARRY_RESPECT_ROBOTS_TXT`: Override robots.txt compliance (true/false)
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to an already-loaded config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("QUARRY_POOL_MAX_ENTRIES") {
            if let Ok(max) = val.parse() {
                self.pool.max_entries = max;
                tracing::debug!("Override pool.max_entries from env: {}", max);
            }
        }

        if let Ok(val) = std::env::var("QUARRY_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("QUARRY_RESPECT_ROBOTS_TXT") {
            if let Ok(respect) = val.parse() {
                self.session.respect_robots_txt = respect;
                tracing::debug!("Override session.respect_robots_txt from env: {}", respect);
            }
        }
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/quarry/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("io", "quarry", "quarry").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

/// Retry behavior for unreliable long-running operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum operation invocations (first attempt included)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling on any single retry delay in milliseconds
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the computed delay
    pub jitter_factor: f64,
    /// Error codes always treated as retryable (e.g. "ECONNRESET")
    pub retryable_errors: Vec<String>,
    /// HTTP statuses treated as retryable
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_errors: Vec::new(),
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Open-state cool-down in milliseconds
    pub timeout_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
        }
    }
}

/// Rate limiting and human-like request pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Minimum inter-request delay in milliseconds
    pub min_delay_ms: u64,
    /// Maximum inter-request delay in milliseconds
    pub max_delay_ms: u64,
    /// Whether to jitter the randomized target delay
    pub enable_jitter: bool,
    /// Jitter as a fraction of the target delay
    pub jitter_factor: f64,
    /// Token bucket burst capacity
    pub bucket_capacity: f64,
    /// Tokens restored per refill interval
    pub refill_rate: f64,
    /// Refill interval in milliseconds
    pub refill_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: 2000,
            max_delay_ms: 5000,
            enable_jitter: true,
            jitter_factor: 0.2,
            bucket_capacity: 10.0,
            refill_rate: 1.0,
            refill_interval_ms: 1000,
        }
    }
}

/// Request monitoring and alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Sliding window for rate computation in milliseconds
    pub window_ms: u64,
    /// Maximum request history entries retained
    pub max_history_size: usize,
    /// Block rate that triggers an alert
    pub block_alert_threshold: f64,
    /// Failure rate that triggers an alert
    pub failure_alert_threshold: f64,
    /// Minimum windowed requests before rates are meaningful
    pub min_requests_for_rates: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_history_size: 1000,
            block_alert_threshold: 0.2,
            failure_alert_threshold: 0.3,
            min_requests_for_rates: 10,
        }
    }
}

/// Session rotation and robots.txt compliance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Rotate the session after this many requests
    pub rotate_after_requests: u32,
    /// Rotate the session after this age in milliseconds
    pub max_session_age_ms: u64,
    /// Clear cookies on rotation
    pub clear_cookies: bool,
    /// Use incognito browser contexts for sessions
    pub use_incognito: bool,
    /// Honor robots.txt disallow rules and crawl delays
    pub respect_robots_txt: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            rotate_after_requests: 50,
            max_session_age_ms: 1_800_000,
            clear_cookies: true,
            use_incognito: true,
            respect_robots_txt: true,
        }
    }
}

/// Browser resource pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum heavyweight browser clients
    pub max_entries: usize,
    /// Maximum lightweight contexts per client
    pub max_contexts_per_entry: usize,
    /// Evict a client idle longer than this (milliseconds)
    pub entry_idle_timeout_ms: u64,
    /// Idle sweep interval (milliseconds)
    pub context_idle_timeout_ms: u64,
    /// Bounded wait for an available slot (milliseconds)
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_entries: 3,
            max_contexts_per_entry: 5,
            entry_idle_timeout_ms: 300_000,
            context_idle_timeout_ms: 60_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retryable_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.session.rotate_after_requests, 50);
        assert_eq!(config.pool.max_entries, 3);
        assert!(config.browser.headless);
        assert!(config.session.respect_robots_txt);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[circuit]"));
        assert!(toml_str.contains("[pool]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.pool.max_entries = 7;
        config.rate_limit.min_delay_ms = 500;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.pool.max_entries, 7);
        assert_eq!(loaded.rate_limit.min_delay_ms, 500);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[retry]
max_attempts = 5

[pool]
max_entries = 2
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.pool.max_entries, 2);
        // These should be defaults
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.rate_limit.min_delay_ms, 2000);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("QUARRY_POOL_MAX_ENTRIES", "9");
        std::env::set_var("QUARRY_HEADLESS", "false");

        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.pool.max_entries, 9);
        assert!(!config.browser.headless);

        std::env::remove_var("QUARRY_POOL_MAX_ENTRIES");
        std::env::remove_var("QUARRY_HEADLESS");
    }
}
