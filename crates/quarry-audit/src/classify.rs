//! Blocked-site detection.
//!
//! Sites that refuse audits rarely say so politely; the evidence is a
//! connection-level failure or a bot-wall phrase buried in an error message.
//! These patterns cover both, alongside the status codes block pages use.

use quarry_core::ErrorDetails;
use regex::Regex;
use std::sync::OnceLock;

/// Status codes typical of a block page rather than a broken site.
const BLOCKED_STATUSES: &[u16] = &[403, 429, 503];

fn blocked_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Connection-level refusals
            r"(?i)connection\s+refused",
            r"(?i)connection\s+reset",
            r"ECONNREFUSED|ECONNRESET",
            // DNS failures
            r"(?i)dns\s+(error|failure|lookup)",
            r"(?i)name\s+not\s+resolved",
            r"ENOTFOUND",
            // TLS/certificate errors
            r"(?i)certificate",
            r"(?i)\b(tls|ssl)\b",
            // Explicit denial phrases
            r"(?i)access\s+denied",
            r"(?i)forbidden",
            r"(?i)captcha",
            r"(?i)bot[\s-]?detect",
            r"(?i)blocked",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
    })
}

/// Whether a message matches the blocked-site pattern set.
#[must_use]
pub fn is_blocked_message(message: &str) -> bool {
    blocked_patterns().iter().any(|p| p.is_match(message))
}

/// Whether an error looks like the site blocking us rather than failing.
#[must_use]
pub fn is_blocked(details: &ErrorDetails) -> bool {
    if let Some(status) = details.status {
        if BLOCKED_STATUSES.contains(&status) {
            return true;
        }
    }
    is_blocked_message(&details.message)
}
