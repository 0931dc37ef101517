//! Matcher thresholds and channel weights.
//!
//! The weights (0.7/0.3 between RGB and gray, 0.6/0.4 between deep and
//! geometric) are the recorded production defaults, exposed as config
//! rather than constants.

use std::env;

/// The matcher's decision contract, fully configurable.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Frames fetched per product image, `[1, 100]`.
    pub retrieval_top_k: usize,
    /// Minimum combined cosine similarity for a candidate to survive.
    pub sim_deep_min: f64,
    /// Minimum RANSAC inlier ratio; a defined `s_kp` below this is a
    /// geometric contradiction and discards the pair.
    pub inliers_min: f64,
    /// Minimum `score_pair` for the best pair of an accepted match.
    pub match_best_min: f64,
    /// Minimum count of supporting pairs.
    pub match_cons_min: usize,
    /// Final acceptance threshold on the fused product-video score.
    pub match_accept: f64,
    /// RGB channel weight in the combined similarity.
    pub rgb_weight: f64,
    /// Grayscale channel weight in the combined similarity.
    pub gray_weight: f64,
    /// Deep channel weight in the pair score.
    pub deep_weight: f64,
    /// Geometric channel weight in the pair score.
    pub kp_weight: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 20,
            sim_deep_min: 0.82,
            inliers_min: 0.35,
            match_best_min: 0.88,
            match_cons_min: 2,
            match_accept: 0.80,
            rgb_weight: 0.7,
            gray_weight: 0.3,
            deep_weight: 0.6,
            kp_weight: 0.4,
        }
    }
}

impl MatcherConfig {
    /// Reads overrides from the environment:
    /// `RETRIEVAL_TOPK`, `SIM_DEEP_MIN`, `INLIERS_MIN`, `MATCH_BEST_MIN`,
    /// `MATCH_CONS_MIN`, `MATCH_ACCEPT`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retrieval_top_k: parse_env("RETRIEVAL_TOPK", defaults.retrieval_top_k),
            sim_deep_min: parse_env("SIM_DEEP_MIN", defaults.sim_deep_min),
            inliers_min: parse_env("INLIERS_MIN", defaults.inliers_min),
            match_best_min: parse_env("MATCH_BEST_MIN", defaults.match_best_min),
            match_cons_min: parse_env("MATCH_CONS_MIN", defaults.match_cons_min),
            match_accept: parse_env("MATCH_ACCEPT", defaults.match_accept),
            ..defaults
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
