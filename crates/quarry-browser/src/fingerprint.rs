use rand::Rng;

/// Fingerprint profile applied to new clients and pages.
///
/// Varies the surface a site sees across pool entries so sequential audits
/// don't all present the identical browser.
#[derive(Debug, Clone)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
}

impl FingerprintProfile {
    /// Generate a randomized profile from common desktop combinations.
    #[must_use]
    pub fn randomized() -> Self {
        let mut rng = rand::thread_rng();

        let user_agents = [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ];

        let viewports = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

        let timezones = ["America/New_York", "America/Chicago", "America/Los_Angeles"];

        let user_agent = user_agents[rng.gen_range(0..user_agents.len())].to_string();
        let (viewport_width, viewport_height) = viewports[rng.gen_range(0..viewports.len())];
        let timezone = timezones[rng.gen_range(0..timezones.len())].to_string();

        Self {
            user_agent,
            viewport_width,
            viewport_height,
            timezone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randomized_profile_is_populated() {
        let profile = FingerprintProfile::randomized();
        assert!(!profile.user_agent.is_empty());
        assert!(profile.viewport_width > 0);
        assert!(profile.viewport_height > 0);
        assert!(!profile.timezone.is_empty());
    }

    #[test]
    fn test_profiles_vary() {
        // Probabilistic but with 3 UA choices over 20 draws a single
        // repeated value is vanishingly unlikely
        let profiles: Vec<_> = (0..20).map(|_| FingerprintProfile::randomized()).collect();
        let first = &profiles[0].user_agent;
        assert!(
            !profiles.iter().all(|p| &p.user_agent == first),
            "expected variation in user agents"
        );
    }
}
