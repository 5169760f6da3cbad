//! robots.txt parsing.
//!
//! Understands user-agent groups, `Allow`/`Disallow` prefix rules,
//! `Crawl-delay`, and `Sitemap` lines. Rule selection prefers a group whose
//! user-agent token matches ours over the `*` group; a matching allow rule
//! overrides an otherwise-matching disallow.

use crate::error::{Result, TrafficError};
use quarry_core::Timestamp;
use std::time::Duration;

/// Parsed rules for one domain, as seen by one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// `Allow` path prefixes
    pub allowed: Vec<String>,
    /// `Disallow` path prefixes
    pub disallowed: Vec<String>,
    /// `Crawl-delay`, when declared
    pub crawl_delay: Option<Duration>,
    /// `Sitemap` URLs (global, not per group)
    pub sitemaps: Vec<String>,
    /// When these rules were fetched
    pub fetched_at: Timestamp,
}

impl RobotsRules {
    /// Rules that allow everything (no robots.txt, or compliance disabled).
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            fetched_at: Timestamp::now(),
            ..Self::default()
        }
    }

    /// Whether `path` may be crawled under these rules.
    ///
    /// A disallow rule of `/` blocks every path; a matching allow rule
    /// overrides an otherwise-matching disallow.
    #[must_use]
    pub fn is_path_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };

        if self.allowed.iter().any(|rule| path.starts_with(rule)) {
            return true;
        }
        !self.disallowed.iter().any(|rule| path.starts_with(rule))
    }
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    allowed: Vec<String>,
    disallowed: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl Group {
    fn matches(&self, user_agent: &str) -> bool {
        let ua = user_agent.to_lowercase();
        self.agents
            .iter()
            .any(|a| a != "*" && ua.contains(a.as_str()))
    }

    fn is_wildcard(&self) -> bool {
        self.agents.iter().any(|a| a == "*")
    }
}

/// Parse robots.txt content for a given user agent.
#[must_use]
pub fn parse_robots(content: &str, user_agent: &str) -> RobotsRules {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;
    let mut sitemaps = Vec::new();
    // A User-agent line after rules starts a new group; consecutive
    // User-agent lines share one group.
    let mut last_was_agent = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_lowercase();
        let value = value.trim();

        match field.as_str() {
            "user-agent" => {
                let agent = value.to_lowercase();
                match current.as_mut() {
                    Some(group) if last_was_agent => group.agents.push(agent),
                    _ => {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(Group {
                            agents: vec![agent],
                            ..Group::default()
                        });
                    }
                }
                last_was_agent = true;
            }
            "allow" => {
                last_was_agent = false;
                if let (Some(group), false) = (current.as_mut(), value.is_empty()) {
                    group.allowed.push(value.to_string());
                }
            }
            "disallow" => {
                last_was_agent = false;
                if let (Some(group), false) = (current.as_mut(), value.is_empty()) {
                    group.disallowed.push(value.to_string());
                }
            }
            "crawl-delay" => {
                last_was_agent = false;
                if let Some(group) = current.as_mut() {
                    if let Ok(secs) = value.parse::<f64>() {
                        group.crawl_delay = Some(Duration::from_secs_f64(secs.max(0.0)));
                    }
                }
            }
            "sitemap" => {
                last_was_agent = false;
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {
                last_was_agent = false;
            }
        }
    }
    if let Some(group) = current.take() {
        groups.push(group);
    }

    let chosen = groups
        .iter()
        .find(|g| g.matches(user_agent))
        .or_else(|| groups.iter().find(|g| g.is_wildcard()));

    let mut rules = RobotsRules {
        sitemaps,
        fetched_at: Timestamp::now(),
        ..RobotsRules::default()
    };
    if let Some(group) = chosen {
        rules.allowed = group.allowed.clone();
        rules.disallowed = group.disallowed.clone();
        rules.crawl_delay = group.crawl_delay;
    }
    rules
}

/// Extract the host from a URL.
pub fn domain_of(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|e| TrafficError::InvalidUrl(e.to_string()))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| TrafficError::InvalidUrl(format!("no host in URL: {url}")))
}
