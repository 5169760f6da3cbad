//! Core error types for the Quarry pipeline.
//!
//! Each subsystem error is represented as a variant for clear error
//! propagation across crate boundaries.

use thiserror::Error;

/// Central error type for Quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource pool errors (exhaustion, shutdown, client failures)
    #[error("pool error: {0}")]
    Pool(String),

    /// Traffic-shaping errors (rate limiting, session, robots.txt)
    #[error("traffic error: {0}")]
    Traffic(String),

    /// Resilience errors (timeouts, exhausted retries, open circuit)
    #[error("resilience error: {0}")]
    Resilience(String),

    /// Browser automation errors
    #[error("browser error: {0}")]
    Browser(String),

    /// Network errors (HTTP requests, DNS)
    #[error("network error: {0}")]
    Network(String),

    /// Validation errors (invalid input, constraints)
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `QuarryError`.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuarryError::Validation("empty lead id".to_string());
        assert_eq!(err.to_string(), "validation error: empty lead id");

        let err = ConfigError::NoConfigDir;
        assert_eq!(
            err.to_string(),
            "could not determine config directory (XDG base directories not available)"
        );
    }

    #[test]
    fn test_error_from_config() {
        let config_err = ConfigError::NoConfigDir;
        let quarry_err: QuarryError = config_err.into();
        assert!(matches!(quarry_err, QuarryError::Config(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let quarry_err: QuarryError = io_err.into();
        assert!(matches!(quarry_err, QuarryError::Io(_)));
    }
}
