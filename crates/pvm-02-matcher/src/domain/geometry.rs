//! Geometric verification: descriptor matching plus RANSAC over an
//! affine model.
//!
//! Determinism contract: the RANSAC sampler is seeded from a SHA-256
//! digest of the `(img_id, frame_id)` pair, so identical inputs verify
//! identically across runs and machines. Iteration count is bounded,
//! which also bounds the per-pair time budget.

use crate::domain::keypoints::KeypointSet;
use nalgebra::{Matrix3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// RANSAC sampling rounds per candidate pair.
const RANSAC_ITERATIONS: usize = 128;

/// Reprojection error below which a correspondence counts as an inlier,
/// pixels.
const INLIER_THRESHOLD_PX: f64 = 3.0;

/// Lowe-style ratio test numerator/denominator (0.8).
const RATIO_NUM: u32 = 4;
const RATIO_DEN: u32 = 5;

/// Deterministic sampler seed for one candidate pair.
#[must_use]
pub fn verification_seed(img_id: &str, frame_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(img_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(frame_id.as_bytes());
    hasher.finalize().into()
}

fn hamming(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Mutual-nearest-neighbor descriptor matching with a ratio test.
///
/// A correspondence `(i, j)` survives when `j` is `i`'s nearest neighbor,
/// `i` is `j`'s nearest neighbor, and the nearest distance passes the
/// 0.8 ratio test against the second-nearest. Iteration order is index
/// order, so the output is deterministic.
#[must_use]
pub fn match_descriptors(image: &KeypointSet, frame: &KeypointSet) -> Vec<(usize, usize)> {
    if image.descriptors.is_empty() || frame.descriptors.is_empty() {
        return Vec::new();
    }

    let forward: Vec<Option<usize>> = image
        .descriptors
        .iter()
        .map(|desc| nearest_with_ratio(desc, &frame.descriptors))
        .collect();
    let backward: Vec<Option<usize>> = frame
        .descriptors
        .iter()
        .map(|desc| nearest_with_ratio(desc, &image.descriptors))
        .collect();

    forward
        .iter()
        .enumerate()
        .filter_map(|(i, j)| {
            let j = (*j)?;
            (backward[j] == Some(i)).then_some((i, j))
        })
        .collect()
}

/// Nearest descriptor index if it passes the ratio test.
fn nearest_with_ratio(desc: &[u8; 32], pool: &[[u8; 32]]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    let mut second: Option<u32> = None;
    for (idx, other) in pool.iter().enumerate() {
        let dist = hamming(desc, other);
        match best {
            None => best = Some((idx, dist)),
            Some((_, best_dist)) if dist < best_dist => {
                second = Some(best_dist);
                best = Some((idx, dist));
            }
            Some(_) => {
                if second.map_or(true, |s| dist < s) {
                    second = Some(dist);
                }
            }
        }
    }
    let (idx, best_dist) = best?;
    match second {
        // best < 0.8 * second, in integer math
        Some(second_dist) if best_dist * RATIO_DEN >= second_dist * RATIO_NUM => None,
        _ => Some(idx),
    }
}

/// RANSAC inlier ratio for a candidate pair: `inliers / total_matches`.
///
/// `None` when fewer than 4 correspondences exist — the geometric score
/// is undefined and the caller applies the embedding fallback.
#[must_use]
pub fn ransac_inlier_ratio(
    image: &KeypointSet,
    frame: &KeypointSet,
    matches: &[(usize, usize)],
    seed: [u8; 32],
) -> Option<f64> {
    if matches.len() < 4 {
        return None;
    }

    let mut rng = ChaCha8Rng::from_seed(seed);
    let mut best_inliers = 0usize;

    for _ in 0..RANSAC_ITERATIONS {
        let Some(sample) = sample_three(&mut rng, matches.len()) else {
            break;
        };
        let src = sample.map(|k| {
            let p = image.points[matches[k].0];
            (f64::from(p.x), f64::from(p.y))
        });
        let dst = sample.map(|k| {
            let p = frame.points[matches[k].1];
            (f64::from(p.x), f64::from(p.y))
        });
        let Some((u, v)) = estimate_affine(src, dst) else {
            continue; // degenerate sample
        };

        let inliers = matches
            .iter()
            .filter(|&&(i, j)| {
                let p = image.points[i];
                let q = frame.points[j];
                let (px, py) = apply_affine(&u, &v, f64::from(p.x), f64::from(p.y));
                let dx = px - f64::from(q.x);
                let dy = py - f64::from(q.y);
                (dx * dx + dy * dy).sqrt() < INLIER_THRESHOLD_PX
            })
            .count();

        if inliers > best_inliers {
            best_inliers = inliers;
        }
    }

    Some(best_inliers as f64 / matches.len() as f64)
}

/// Three distinct indices in `0..len`.
fn sample_three(rng: &mut ChaCha8Rng, len: usize) -> Option<[usize; 3]> {
    if len < 3 {
        return None;
    }
    let a = rng.gen_range(0..len);
    let mut b = rng.gen_range(0..len - 1);
    if b >= a {
        b += 1;
    }
    let mut c = rng.gen_range(0..len - 2);
    for taken in [a.min(b), a.max(b)] {
        if c >= taken {
            c += 1;
        }
    }
    Some([a, b, c])
}

/// Solves the 6-DOF affine transform mapping `src` onto `dst` from three
/// correspondences. `None` for collinear (degenerate) samples.
fn estimate_affine(
    src: [(f64, f64); 3],
    dst: [(f64, f64); 3],
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let m = Matrix3::new(
        src[0].0, src[0].1, 1.0, //
        src[1].0, src[1].1, 1.0, //
        src[2].0, src[2].1, 1.0,
    );
    if m.determinant().abs() < 1e-6 {
        return None;
    }
    let inv = m.try_inverse()?;
    let u = inv * Vector3::new(dst[0].0, dst[1].0, dst[2].0);
    let v = inv * Vector3::new(dst[0].1, dst[1].1, dst[2].1);
    Some((u, v))
}

fn apply_affine(u: &Vector3<f64>, v: &Vector3<f64>, x: f64, y: f64) -> (f64, f64) {
    (u[0] * x + u[1] * y + u[2], v[0] * x + v[1] * y + v[2])
}
