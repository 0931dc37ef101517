//! Candidate retrieval: exact cosine top-K over the job's frames.
//!
//! RGB and grayscale channels fuse with fixed weights; when one channel is
//! absent on either side the other carries full weight. An asset with no
//! embedding at all never becomes a candidate — it is skipped, never a
//! job failure.

use crate::config::MatcherConfig;

/// The embedding channels of one asset, as loaded from the catalog.
#[derive(Debug, Clone, Default)]
pub struct AssetFeatures {
    pub rgb: Option<Vec<f32>>,
    pub gray: Option<Vec<f32>>,
}

impl AssetFeatures {
    /// Whether any embedding channel is present.
    #[must_use]
    pub fn has_embedding(&self) -> bool {
        self.rgb.is_some() || self.gray.is_some()
    }
}

/// One retrieved frame candidate for a product image.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Index into the frame slice handed to [`top_k_candidates`].
    pub frame_index: usize,
    /// Combined channel similarity, `[-1, 1]` clamped to candidates by
    /// the `sim_deep_min` floor.
    pub similarity: f64,
}

/// Cosine similarity. `None` when the vectors are incomparable (length
/// mismatch or zero norm).
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Weighted RGB+gray similarity between two assets. Channels missing on
/// either side drop out and the remaining weight renormalizes; `None`
/// when no channel is comparable.
#[must_use]
pub fn combined_similarity(
    image: &AssetFeatures,
    frame: &AssetFeatures,
    config: &MatcherConfig,
) -> Option<f64> {
    let rgb = match (&image.rgb, &frame.rgb) {
        (Some(a), Some(b)) => cosine(a, b),
        _ => None,
    };
    let gray = match (&image.gray, &frame.gray) {
        (Some(a), Some(b)) => cosine(a, b),
        _ => None,
    };

    match (rgb, gray) {
        (Some(r), Some(g)) => Some(config.rgb_weight * r + config.gray_weight * g),
        (Some(r), None) => Some(r),
        (None, Some(g)) => Some(g),
        (None, None) => None,
    }
}

/// Top-K frames for one product image, descending similarity, candidates
/// below `sim_deep_min` dropped. Ties break on the lower frame index so
/// the ranking is stable across runs.
#[must_use]
pub fn top_k_candidates(
    image: &AssetFeatures,
    frames: &[AssetFeatures],
    config: &MatcherConfig,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = frames
        .iter()
        .enumerate()
        .filter_map(|(frame_index, frame)| {
            let similarity = combined_similarity(image, frame, config)?;
            (similarity >= config.sim_deep_min).then_some(Candidate {
                frame_index,
                similarity,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.frame_index.cmp(&b.frame_index))
    });
    candidates.truncate(config.retrieval_top_k);
    candidates
}
