//! Shared types used across the Quarry pipeline.

use crate::error::QuarryError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Newtype for lead identifiers with validation.
///
/// Lead IDs are printable, non-empty, at most 128 characters, with no
/// whitespace. They come from the discovery layer (database row keys or
/// external place IDs), so the format is deliberately loose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(String);

impl LeadId {
    /// Create a new `LeadId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is empty, too long, or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, QuarryError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `LeadId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), QuarryError> {
        static LEAD_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex =
            LEAD_REGEX.get_or_init(|| Regex::new(r"^\S{1,128}$").expect("valid regex"));

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(QuarryError::Validation(format!(
                "invalid lead ID: must be 1-128 non-whitespace characters, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Lets maps keyed by LeadId be queried with plain &str.
impl std::borrow::Borrow<str> for LeadId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling
/// on records that cross crate boundaries (request log entries, alerts,
/// session metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, QuarryError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| QuarryError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Milliseconds elapsed since this timestamp; zero if in the future.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        let delta = Utc::now() - self.0;
        u64::try_from(delta.num_milliseconds()).unwrap_or(0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_id_valid() {
        for id in ["lead-42", "place:ChIJ123", "a", &"x".repeat(128)] {
            assert!(LeadId::new(id).is_ok(), "Failed for: {id}");
        }
    }

    #[test]
    fn test_lead_id_invalid() {
        let too_long = "x".repeat(129);
        for id in ["", "has space", "tab\there", too_long.as_str()] {
            assert!(LeadId::new(id).is_err(), "Should fail for: {id:?}");
        }
    }

    #[test]
    fn test_lead_id_generate_unique() {
        assert_ne!(LeadId::generate(), LeadId::generate());
    }

    #[test]
    fn test_lead_id_map_lookup_by_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(LeadId::new("lead-42").expect("valid id"), 1);
        assert_eq!(map.get("lead-42"), Some(&1));
        assert!(map.contains_key("lead-42"));
    }

    #[test]
    fn test_timestamp_rfc3339_round_trip() {
        let ts = Timestamp::now();
        let parsed = Timestamp::from_rfc3339(&ts.to_rfc3339()).expect("parse RFC3339");
        assert_eq!(
            ts.as_datetime().timestamp_millis(),
            parsed.as_datetime().timestamp_millis()
        );
    }

    #[test]
    fn test_timestamp_age() {
        let ts = Timestamp::from_rfc3339("2020-01-01T00:00:00Z").expect("parse");
        assert!(ts.age_ms() > 0);

        let future = Timestamp::from(Utc::now() + chrono::Duration::hours(1));
        assert_eq!(future.age_ms(), 0);
    }
}
