//! Configuration parsing for trial campaigns
//!
//! This module provides TOML-based configuration for defining measurement
//! campaigns: the hub page, the destination set, the impairment conditions
//! to sweep, and the trial count, dwell, deadline and breaker parameters.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::destinations::Destination;

/// Main configuration structure loaded from TOML files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Campaign configuration
    pub campaign: CampaignConfig,
    /// Impairment conditions to sweep (defaults to a single unimpaired one)
    #[serde(default = "default_conditions")]
    pub conditions: Vec<Condition>,
    /// Destination pages measured and watched for speculative loads
    pub destinations: Vec<Destination>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML is malformed
    /// - Required fields are missing
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or required fields are missing
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the type system cannot express.
    fn validate(&self) -> anyhow::Result<()> {
        if self.destinations.len() < 2 {
            anyhow::bail!(
                "at least two destinations are required (one measured, one candidate); got {}",
                self.destinations.len()
            );
        }
        if self.campaign.trials == 0 {
            anyhow::bail!("campaign.trials must be at least 1");
        }
        if self.campaign.skip_threshold == 0 {
            anyhow::bail!("campaign.skip_threshold must be at least 1");
        }
        for condition in &self.conditions {
            if condition.cpu_slowdown < 1.0 {
                anyhow::bail!(
                    "condition '{}': cpu_slowdown must be >= 1.0 (got {})",
                    condition.label,
                    condition.cpu_slowdown
                );
            }
        }
        Ok(())
    }
}

/// Core campaign parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Name of the campaign (used in logs only)
    pub name: String,
    /// Hub page every trial lands on before navigating
    pub hub_url: String,
    /// Number of trials per condition × destination pair (default: 30)
    #[serde(default = "default_trials")]
    pub trials: u32,
    /// Dwell time on the hub page in milliseconds (default: 2000)
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    /// Upper bound for one trial in milliseconds (default: 120000)
    #[serde(default = "default_trial_timeout_ms")]
    pub trial_timeout_ms: u64,
    /// Consecutive failures before the remaining trials of a pair are
    /// skipped as synthetic timeout rows (default: 5)
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: u32,
    /// CSV output path (default: raw.csv)
    #[serde(default = "default_output_file")]
    pub output_file: String,
}

impl CampaignConfig {
    /// Dwell duration on the hub page.
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Global per-trial deadline.
    pub fn trial_timeout(&self) -> Duration {
        Duration::from_millis(self.trial_timeout_ms)
    }
}

fn default_trials() -> u32 {
    30
}

fn default_dwell_ms() -> u64 {
    2000
}

fn default_trial_timeout_ms() -> u64 {
    120_000
}

fn default_skip_threshold() -> u32 {
    5
}

fn default_output_file() -> String {
    "raw.csv".to_string()
}

fn default_conditions() -> Vec<Condition> {
    vec![Condition {
        label: "vanilla".to_string(),
        network_profile: NetworkProfile::None,
        cpu_slowdown: 1.0,
    }]
}

/// One impairment condition applied to every trial of a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Label used in output rows (e.g. "Fast 3G x4")
    pub label: String,
    /// Network profile to simulate
    #[serde(default)]
    pub network_profile: NetworkProfile,
    /// CPU slowdown multiplier (1.0 = no slowdown, 4.0 = 4x slower)
    #[serde(default = "default_cpu_slowdown")]
    pub cpu_slowdown: f64,
}

fn default_cpu_slowdown() -> f64 {
    1.0
}

/// Predefined network throttling profiles
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum NetworkProfile {
    /// Fast 4G (100 Mbps down, 50 Mbps up, 5ms RTT)
    Fast4G,
    /// Regular 4G (30 Mbps down, 15 Mbps up, 20ms RTT)
    Regular4G,
    /// Fast 3G (1.5 Mbps down, 750 Kbps up, 20ms RTT)
    Fast3G,
    /// Slow 3G (400 Kbps down, 100 Kbps up, 20ms RTT)
    Slow3G,
    /// Offline mode (no network)
    Offline,
    /// No throttling
    #[default]
    None,
}

impl NetworkProfile {
    /// Get the download speed in bytes per second
    pub fn download_bps(&self) -> Option<u64> {
        match self {
            NetworkProfile::Fast4G => Some(100 * 1024 * 1024 / 8),
            NetworkProfile::Regular4G => Some(30 * 1024 * 1024 / 8),
            NetworkProfile::Fast3G => Some(1_572_864 / 8),
            NetworkProfile::Slow3G => Some(400 * 1024 / 8),
            NetworkProfile::Offline => Some(0),
            NetworkProfile::None => None,
        }
    }

    /// Get the upload speed in bytes per second
    pub fn upload_bps(&self) -> Option<u64> {
        match self {
            NetworkProfile::Fast4G => Some(50 * 1024 * 1024 / 8),
            NetworkProfile::Regular4G => Some(15 * 1024 * 1024 / 8),
            NetworkProfile::Fast3G => Some(750 * 1024 / 8),
            NetworkProfile::Slow3G => Some(100 * 1024 / 8),
            NetworkProfile::Offline => Some(0),
            NetworkProfile::None => None,
        }
    }

    /// Get the round-trip time in milliseconds
    pub fn rtt_ms(&self) -> Option<u64> {
        match self {
            NetworkProfile::Fast4G => Some(5),
            NetworkProfile::Regular4G
            | NetworkProfile::Fast3G
            | NetworkProfile::Slow3G => Some(20),
            NetworkProfile::Offline => Some(0),
            NetworkProfile::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r##"
        [campaign]
        name = "Smoke"
        hub_url = "https://home.lab-ish.com/index.html"

        [[destinations]]
        name = "Light"
        url = "https://victim.lab-ish.com/"
        selector = "#link-light"

        [[destinations]]
        name = "Heavy"
        url = "https://attack.lab-ish.com/"
        selector = "#link-heavy"
    "##;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.campaign.name, "Smoke");
        assert_eq!(config.campaign.trials, 30);
        assert_eq!(config.campaign.dwell_ms, 2000);
        assert_eq!(config.campaign.trial_timeout_ms, 120_000);
        assert_eq!(config.campaign.skip_threshold, 5);
        assert_eq!(config.campaign.output_file, "raw.csv");
        assert_eq!(config.conditions.len(), 1);
        assert_eq!(config.conditions[0].label, "vanilla");
        assert_eq!(config.conditions[0].network_profile, NetworkProfile::None);
        assert_eq!(config.destinations.len(), 2);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r##"
            [campaign]
            name = "Sweep"
            hub_url = "https://home.lab-ish.com/index.html"
            trials = 100
            dwell_ms = 5000
            trial_timeout_ms = 60000
            skip_threshold = 3
            output_file = "sweep.csv"

            [[conditions]]
            label = "Fast 3G"
            network_profile = "Fast3G"

            [[conditions]]
            label = "Slow 3G x4"
            network_profile = "Slow3G"
            cpu_slowdown = 4.0

            [[destinations]]
            name = "Light"
            url = "https://victim.lab-ish.com/"
            selector = "#link-light"

            [[destinations]]
            name = "Medium"
            url = "https://depth.lab-ish.com/"
            selector = "#link-medium"

            [[destinations]]
            name = "Heavy"
            url = "https://attack.lab-ish.com/"
            selector = "#link-heavy"
        "##;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.campaign.trials, 100);
        assert_eq!(config.campaign.dwell(), Duration::from_secs(5));
        assert_eq!(config.campaign.trial_timeout(), Duration::from_secs(60));
        assert_eq!(config.conditions.len(), 2);
        assert_eq!(config.conditions[1].cpu_slowdown, 4.0);
        assert_eq!(config.conditions[1].network_profile, NetworkProfile::Slow3G);
        assert_eq!(config.destinations.len(), 3);
        assert_eq!(config.destinations[1].selector, "#link-medium");
    }

    #[test]
    fn test_single_destination_rejected() {
        let toml = r##"
            [campaign]
            name = "Broken"
            hub_url = "https://home.lab-ish.com/"

            [[destinations]]
            name = "Only"
            url = "https://victim.lab-ish.com/"
            selector = "#only"
        "##;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_cpu_slowdown_below_one_rejected() {
        let toml = r##"
            [campaign]
            name = "Broken"
            hub_url = "https://home.lab-ish.com/"

            [[conditions]]
            label = "bad"
            cpu_slowdown = 0.5

            [[destinations]]
            name = "Light"
            url = "https://victim.lab-ish.com/"
            selector = "#link-light"

            [[destinations]]
            name = "Heavy"
            url = "https://attack.lab-ish.com/"
            selector = "#link-heavy"
        "##;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_network_profile_speeds() {
        assert_eq!(NetworkProfile::Fast4G.download_bps(), Some(13_107_200));
        assert_eq!(NetworkProfile::Fast4G.upload_bps(), Some(6_553_600));
        assert_eq!(NetworkProfile::Fast4G.rtt_ms(), Some(5));

        assert_eq!(NetworkProfile::Fast3G.download_bps(), Some(196_608));
        assert_eq!(NetworkProfile::Fast3G.upload_bps(), Some(96_000));
        assert_eq!(NetworkProfile::Fast3G.rtt_ms(), Some(20));

        assert_eq!(NetworkProfile::Slow3G.download_bps(), Some(51_200));

        assert_eq!(NetworkProfile::None.download_bps(), None);
        assert_eq!(NetworkProfile::None.upload_bps(), None);
        assert_eq!(NetworkProfile::None.rtt_ms(), None);
    }
}
