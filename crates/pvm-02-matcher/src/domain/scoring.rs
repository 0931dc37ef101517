//! Pair fusion, per-(product, video) aggregation, and acceptance gating.

use crate::config::MatcherConfig;
use std::cmp::Ordering;

/// One scored (image, frame) candidate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScore {
    pub img_id: String,
    pub frame_id: String,
    /// Frame timestamp, seconds.
    pub ts: f64,
    /// Combined deep-embedding similarity.
    pub s_deep: f64,
    /// Geometric inlier ratio; `None` when undefined (fewer than 4
    /// correspondences or a blob missing on either side).
    pub s_kp: Option<f64>,
    /// The fused pair score.
    pub score_pair: f64,
}

impl PairScore {
    /// Fuses the channels: `0.6·s_deep + 0.4·s_kp` when the geometric
    /// score is defined, otherwise `s_deep` alone.
    #[must_use]
    pub fn fuse(
        img_id: String,
        frame_id: String,
        ts: f64,
        s_deep: f64,
        s_kp: Option<f64>,
        config: &MatcherConfig,
    ) -> Self {
        let score_pair = match s_kp {
            Some(kp) => config.deep_weight * s_deep + config.kp_weight * kp,
            None => s_deep,
        };
        Self {
            img_id,
            frame_id,
            ts,
            s_deep,
            s_kp,
            score_pair,
        }
    }
}

/// Total order for best-pair selection: higher `score_pair`, then higher
/// `s_deep`, then lower `ts` (earliest moment in the video), then
/// lexicographically smaller `(img_id, frame_id)`. `Ordering::Less`
/// means `a` ranks ahead of `b`.
#[must_use]
pub fn pair_order(a: &PairScore, b: &PairScore) -> Ordering {
    b.score_pair
        .partial_cmp(&a.score_pair)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.s_deep.partial_cmp(&a.s_deep).unwrap_or(Ordering::Equal))
        .then_with(|| a.ts.partial_cmp(&b.ts).unwrap_or(Ordering::Equal))
        .then_with(|| a.img_id.cmp(&b.img_id))
        .then_with(|| a.frame_id.cmp(&b.frame_id))
}

/// An accepted (product, video) decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub best: PairScore,
    /// `max(score_pair)·0.5 + mean(top-N score_pair)·0.5`.
    pub fused_score: f64,
}

/// Evaluates the acceptance gates over one (product, video)'s candidate
/// pairs. All three must hold:
///
/// 1. a best pair with `score_pair >= match_best_min`;
/// 2. at least `match_cons_min` pairs with `score_pair >= sim_deep_min`;
/// 3. fused score `>= match_accept`.
#[must_use]
pub fn evaluate_acceptance(pairs: &[PairScore], config: &MatcherConfig) -> Option<Acceptance> {
    if pairs.is_empty() {
        return None;
    }

    let mut ranked: Vec<&PairScore> = pairs.iter().collect();
    ranked.sort_by(|a, b| pair_order(a, b));
    let best = ranked[0];

    if best.score_pair < config.match_best_min {
        return None;
    }

    let supporting = pairs
        .iter()
        .filter(|p| p.score_pair >= config.sim_deep_min)
        .count();
    if supporting < config.match_cons_min {
        return None;
    }

    let top_n: Vec<f64> = ranked
        .iter()
        .take(config.match_cons_min)
        .map(|p| p.score_pair)
        .collect();
    let mean_top = top_n.iter().sum::<f64>() / top_n.len() as f64;
    let fused_score = best.score_pair * 0.5 + mean_top * 0.5;

    if fused_score < config.match_accept {
        return None;
    }

    Some(Acceptance {
        best: best.clone(),
        fused_score,
    })
}
