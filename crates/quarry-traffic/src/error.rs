use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrafficError>;

#[derive(Debug, Error)]
pub enum TrafficError {
    /// A bounded token-bucket wait ran out before enough tokens refilled
    #[error("gave up waiting for rate limit slot after {waited:?}")]
    WaitExhausted { waited: Duration },

    /// robots.txt could not be fetched
    #[error("failed to fetch robots.txt for {domain}: {reason}")]
    RobotsFetch { domain: String, reason: String },

    /// The URL is disallowed by the site's robots.txt
    #[error("robots.txt disallows {url}")]
    Disallowed { url: String },

    /// The URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrafficError::Disallowed {
            url: "https://example.com/admin".to_string(),
        };
        assert!(err.to_string().contains("example.com/admin"));

        let err = TrafficError::WaitExhausted {
            waited: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("60s"));
    }
}
