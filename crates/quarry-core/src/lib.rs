//! Shared foundation for the Quarry lead-generation pipeline.
//!
//! Provides the common identifier and timestamp types, the central error
//! taxonomy used to classify failures from third-party sites, and TOML-based
//! application configuration.

pub mod classify;
pub mod config;
pub mod error;
pub mod types;

pub use classify::{classify_details, ErrorDetails, FailureKind, Verdict};
pub use config::AppConfig;
pub use error::{ConfigError, ConfigResult, QuarryError, Result};
pub use types::{LeadId, Timestamp};
