//! Tracker configuration.

use std::env;
use std::time::Duration;

/// Tuning for the completion aggregator.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Percentage of the announced total that must arrive before the
    /// completion fires, `[0, 100]`. Clamped on read.
    pub completion_threshold_pct: u8,

    /// Watermark applied when a batch does not carry `watermark_ttl`.
    pub default_watermark_ttl_secs: u64,

    /// How often the sweeper scans for lapsed watermarks.
    pub sweep_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            completion_threshold_pct: 90,
            default_watermark_ttl_secs: 300,
            sweep_interval: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    /// Reads overrides from the environment.
    ///
    /// - `COMPLETION_THRESHOLD_PERCENTAGE` (default 90, clamped to 100)
    /// - `PVM_WATERMARK_TTL_SECS` (default 300)
    /// - `PVM_WATERMARK_SWEEP_SECS` (default 10)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            completion_threshold_pct: env::var("COMPLETION_THRESHOLD_PERCENTAGE")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.min(100) as u8)
                .unwrap_or(defaults.completion_threshold_pct),
            default_watermark_ttl_secs: env::var("PVM_WATERMARK_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_watermark_ttl_secs),
            sweep_interval: env::var("PVM_WATERMARK_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// The threshold clamped to `[0, 100]`.
    #[must_use]
    pub fn threshold(&self) -> u8 {
        self.completion_threshold_pct.min(100)
    }
}
