//! Configuration structures for the spin log client.
//!
//! Strongly typed structs with per-field defaults so the rest of the crate
//! can depend on a stable configuration shape irrespective of how the data
//! is loaded (embedded defaults, YAML overrides, tests).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpinSyncConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub links: LinkConfig,
    #[serde(default)]
    pub embed: EmbedConfig,
}

impl SpinSyncConfig {
    /// Parse a configuration from YAML. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Adaptive refresh scheduling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval used when the newest spin is about to end (seconds)
    #[serde(default = "PollingConfig::default_interval_short")]
    pub interval_short_seconds: u64,
    /// Base interval used otherwise (seconds)
    #[serde(default = "PollingConfig::default_interval_long")]
    pub interval_long_seconds: u64,
    /// Minimum spacing between two actual refreshes (seconds)
    #[serde(default = "PollingConfig::default_min_spacing")]
    pub min_spacing_seconds: u64,
    /// A spin ending within this window counts as "ending soon" (seconds)
    #[serde(default = "PollingConfig::default_ending_soon_window")]
    pub ending_soon_window_seconds: u64,
}

impl PollingConfig {
    const fn default_interval_short() -> u64 {
        10
    }

    const fn default_interval_long() -> u64 {
        30
    }

    const fn default_min_spacing() -> u64 {
        8
    }

    const fn default_ending_soon_window() -> u64 {
        45
    }

    pub fn short_interval(&self) -> Duration {
        Duration::from_secs(self.interval_short_seconds)
    }

    pub fn long_interval(&self) -> Duration {
        Duration::from_secs(self.interval_long_seconds)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_secs(self.min_spacing_seconds)
    }

    pub fn ending_soon_window(&self) -> Duration {
        Duration::from_secs(self.ending_soon_window_seconds)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_short_seconds: Self::default_interval_short(),
            interval_long_seconds: Self::default_interval_long(),
            min_spacing_seconds: Self::default_min_spacing(),
            ending_soon_window_seconds: Self::default_ending_soon_window(),
        }
    }
}

/// Pagination parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    /// Page size requested from the backend
    #[serde(default = "PageConfig::default_limit")]
    pub limit: usize,
    /// Fraction of the accumulated sequence at which the next page is
    /// speculatively prefetched
    #[serde(default = "PageConfig::default_prefetch_threshold")]
    pub prefetch_threshold: f64,
}

impl PageConfig {
    const fn default_limit() -> usize {
        15
    }

    const fn default_prefetch_threshold() -> f64 {
        0.8
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            limit: Self::default_limit(),
            prefetch_threshold: Self::default_prefetch_threshold(),
        }
    }
}

/// Streaming-link resolution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// TTL for resolved link sets (seconds); absorbs rapid repeated
    /// UI-driven calls for the same track
    #[serde(default = "LinkConfig::default_ttl")]
    pub ttl_seconds: u64,
    /// Fixed delay before the single retry after a rate-limit response
    /// (milliseconds)
    #[serde(default = "LinkConfig::default_rate_limit_retry_ms")]
    pub rate_limit_retry_ms: u64,
}

impl LinkConfig {
    const fn default_ttl() -> u64 {
        5
    }

    const fn default_rate_limit_retry_ms() -> u64 {
        800
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn rate_limit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_retry_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: Self::default_ttl(),
            rate_limit_retry_ms: Self::default_rate_limit_retry_ms(),
        }
    }
}

/// Embedded-widget polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Fixed polling interval (seconds)
    #[serde(default = "EmbedConfig::default_interval")]
    pub interval_seconds: u64,
    /// Attempts per poll before giving up on that tick
    #[serde(default = "EmbedConfig::default_max_retries")]
    pub max_retries: u32,
    /// Initial retry backoff (milliseconds)
    #[serde(default = "EmbedConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap (milliseconds)
    #[serde(default = "EmbedConfig::default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl EmbedConfig {
    const fn default_interval() -> u64 {
        30
    }

    const fn default_max_retries() -> u32 {
        3
    }

    const fn default_backoff_base_ms() -> u64 {
        1000
    }

    const fn default_backoff_cap_ms() -> u64 {
        8000
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            interval_seconds: Self::default_interval(),
            max_retries: Self::default_max_retries(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_cap_ms: Self::default_backoff_cap_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = SpinSyncConfig::default();
        assert_eq!(cfg.polling.short_interval(), Duration::from_secs(10));
        assert_eq!(cfg.polling.long_interval(), Duration::from_secs(30));
        assert_eq!(cfg.polling.min_spacing(), Duration::from_secs(8));
        assert_eq!(cfg.page.limit, 15);
        assert_eq!(cfg.page.prefetch_threshold, 0.8);
        assert_eq!(cfg.links.ttl(), Duration::from_secs(5));
        assert_eq!(
            cfg.links.rate_limit_retry_delay(),
            Duration::from_millis(800)
        );
        assert_eq!(cfg.embed.interval(), Duration::from_secs(30));
        assert_eq!(cfg.embed.max_retries, 3);
    }

    #[test]
    fn partial_yaml_keeps_defaults_elsewhere() {
        let cfg = SpinSyncConfig::from_yaml(
            "polling:\n  interval_long_seconds: 15\npage:\n  limit: 25\n",
        )
        .unwrap();
        assert_eq!(cfg.polling.long_interval(), Duration::from_secs(15));
        assert_eq!(cfg.polling.short_interval(), Duration::from_secs(10));
        assert_eq!(cfg.page.limit, 25);
        assert_eq!(cfg.links.ttl_seconds, 5);
    }
}
