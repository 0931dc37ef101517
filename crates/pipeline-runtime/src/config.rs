//! Runtime configuration with environment overrides.

use pvm_01_feature_tracker::TrackerConfig;
use pvm_02_matcher::MatcherConfig;
use pvm_04_transition::TransitionConfig;
use std::env;
use std::path::PathBuf;

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Blob-store root: `images/`, `frames/`, `masks_product/`,
    /// `keypoints/`, `evidence/` live underneath, plus the exclusive
    /// lock file.
    pub data_root: PathBuf,
    /// Completion aggregation tuning.
    pub tracker: TrackerConfig,
    /// Matching thresholds and weights.
    pub matcher: MatcherConfig,
    /// Transition manager tuning.
    pub transition: TransitionConfig,
    /// Durable ledger directory (used when the `rocksdb` feature is
    /// enabled); `None` keeps the ledger in memory.
    pub ledger_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            tracker: TrackerConfig::default(),
            matcher: MatcherConfig::default(),
            transition: TransitionConfig::default(),
            ledger_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Reads the full configuration from the environment.
    ///
    /// - `PVM_DATA_ROOT` (default `./data`)
    /// - `PVM_LEDGER_DIR` (unset keeps the ledger in memory)
    /// - plus the per-worker variables of [`TrackerConfig::from_env`],
    ///   [`MatcherConfig::from_env`], and [`TransitionConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            data_root: env::var("PVM_DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            tracker: TrackerConfig::from_env(),
            matcher: MatcherConfig::from_env(),
            transition: TransitionConfig::from_env(),
            ledger_dir: env::var("PVM_LEDGER_DIR").ok().map(PathBuf::from),
        }
    }
}
