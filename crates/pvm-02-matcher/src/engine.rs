//! The match engine: loads a job's assets, runs the decision contract,
//! and persists accepted matches.
//!
//! Store loads happen up front; the cross-product sweep itself is pure
//! and runs on the rayon pool, so no lock is held across a suspension
//! point.

use crate::config::MatcherConfig;
use crate::domain::keypoints::KeypointSet;
use crate::domain::retrieval::{top_k_candidates, AssetFeatures};
use crate::domain::scoring::{evaluate_acceptance, PairScore};
use crate::domain::{match_descriptors, ransac_inlier_ratio, verification_seed};
use chrono::Utc;
use rayon::prelude::*;
use shared_bus::payloads::MatchRequest;
use shared_store::ports::{CatalogStore, MatchStore};
use shared_types::entities::{MatchRecord, MatchStatus, ProductImage, VideoFrame};
use shared_types::errors::HandlerError;
use shared_types::timeouts;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A product image with its loaded features.
struct ImageAsset {
    img_id: String,
    product_id: String,
    features: AssetFeatures,
    keypoints: Option<KeypointSet>,
}

/// Frame metadata parallel to the feature slice handed to retrieval.
struct FrameMeta {
    frame_id: String,
    video_id: String,
    ts: f64,
    keypoints: Option<KeypointSet>,
}

/// An accepted match: the persisted record plus the best pair's own
/// score, which goes on the wire but not into the row.
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    pub record: MatchRecord,
    pub best_score_pair: f64,
}

/// The matcher engine.
pub struct MatchEngine {
    catalog: Arc<dyn CatalogStore>,
    matches: Arc<dyn MatchStore>,
    config: MatcherConfig,
}

impl MatchEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        matches: Arc<dyn MatchStore>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            catalog,
            matches,
            config,
        }
    }

    /// Processes one `match.request`: retrieval, verification, fusion,
    /// acceptance, persistence. Returns the accepted matches in
    /// deterministic `(product_id, video_id)` order.
    ///
    /// Empty product or video sets short-circuit to zero matches.
    pub async fn process(&self, request: &MatchRequest) -> Result<Vec<AcceptedMatch>, HandlerError> {
        let images = tokio::time::timeout(
            timeouts::STORE_QUERY,
            self.catalog.product_images_for_job(&request.product_set_id),
        )
        .await
        .map_err(|_| HandlerError::retriable("product image load timed out"))??;
        let frames = tokio::time::timeout(
            timeouts::STORE_QUERY,
            self.catalog.video_frames_for_job(&request.video_set_id),
        )
        .await
        .map_err(|_| HandlerError::retriable("video frame load timed out"))??;

        let images: Vec<ImageAsset> = images.into_iter().filter_map(load_image).collect();
        let (frame_features, frame_meta) = load_frames(frames);

        if images.is_empty() || frame_features.is_empty() {
            info!(
                job_id = %request.job_id,
                images = images.len(),
                frames = frame_features.len(),
                "Empty asset set, zero matches"
            );
            return Ok(Vec::new());
        }

        debug!(
            job_id = %request.job_id,
            images = images.len(),
            frames = frame_features.len(),
            top_k = request.top_k,
            "Running cross-product sweep"
        );

        let mut config = self.config.clone();
        config.retrieval_top_k = config.retrieval_top_k.min(request.top_k as usize).max(1);

        let job_id = request.job_id.clone();
        let accepted = tokio::task::spawn_blocking(move || {
            compute_matches(&job_id, images, frame_features, frame_meta, &config)
        })
        .await
        .map_err(|e| HandlerError::retriable(format!("match sweep panicked: {e}")))?;

        for matched in &accepted {
            self.matches.upsert(matched.record.clone()).await?;
        }
        Ok(accepted)
    }
}

/// Loads features for one image row; `None` when no embedding channel is
/// present (the asset is skipped, never a job failure).
fn load_image(row: ProductImage) -> Option<ImageAsset> {
    let features = AssetFeatures {
        rgb: row.emb_rgb,
        gray: row.emb_gray,
    };
    if !features.has_embedding() {
        debug!(img_id = %row.img_id, "Image has no embeddings, skipping");
        return None;
    }
    Some(ImageAsset {
        keypoints: load_blob(row.kp_blob_path.as_deref(), &row.img_id),
        img_id: row.img_id,
        product_id: row.product_id,
        features,
    })
}

fn load_frames(rows: Vec<VideoFrame>) -> (Vec<AssetFeatures>, Vec<FrameMeta>) {
    let mut features = Vec::with_capacity(rows.len());
    let mut meta = Vec::with_capacity(rows.len());
    for row in rows {
        let f = AssetFeatures {
            rgb: row.emb_rgb,
            gray: row.emb_gray,
        };
        if !f.has_embedding() {
            debug!(frame_id = %row.frame_id, "Frame has no embeddings, skipping");
            continue;
        }
        meta.push(FrameMeta {
            keypoints: load_blob(row.kp_blob_path.as_deref(), &row.frame_id),
            frame_id: row.frame_id,
            video_id: row.video_id,
            ts: row.ts,
        });
        features.push(f);
    }
    (features, meta)
}

/// A missing or unreadable blob degrades to "feature absent".
fn load_blob(path: Option<&str>, asset_id: &str) -> Option<KeypointSet> {
    let path = path?;
    match KeypointSet::load(Path::new(path)) {
        Ok(set) => set,
        Err(err) => {
            warn!(%asset_id, error = %err, "Unreadable keypoint blob, treating as absent");
            None
        }
    }
}

/// The pure sweep: per product, retrieve top-K frames per image, verify,
/// fuse, aggregate per video, gate.
fn compute_matches(
    job_id: &str,
    images: Vec<ImageAsset>,
    frame_features: Vec<AssetFeatures>,
    frame_meta: Vec<FrameMeta>,
    config: &MatcherConfig,
) -> Vec<AcceptedMatch> {
    // Group images by product; BTreeMap keeps product order stable.
    let mut by_product: BTreeMap<String, Vec<ImageAsset>> = BTreeMap::new();
    for image in images {
        by_product.entry(image.product_id.clone()).or_default().push(image);
    }
    let products: Vec<(String, Vec<ImageAsset>)> = by_product.into_iter().collect();

    let per_product: Vec<Vec<AcceptedMatch>> = products
        .par_iter()
        .map(|(product_id, product_images)| {
            score_product(
                job_id,
                product_id,
                product_images,
                &frame_features,
                &frame_meta,
                config,
            )
        })
        .collect();

    per_product.into_iter().flatten().collect()
}

fn score_product(
    job_id: &str,
    product_id: &str,
    images: &[ImageAsset],
    frame_features: &[AssetFeatures],
    frame_meta: &[FrameMeta],
    config: &MatcherConfig,
) -> Vec<AcceptedMatch> {
    // Aggregate candidate pairs per video; BTreeMap keeps video order
    // stable for deterministic emission.
    let mut by_video: BTreeMap<String, Vec<PairScore>> = BTreeMap::new();

    for image in images {
        for candidate in top_k_candidates(&image.features, frame_features, config) {
            let meta = &frame_meta[candidate.frame_index];
            let s_deep = candidate.similarity;

            // Geometric channel: defined only when both blobs exist and
            // enough correspondences survive matching. Otherwise the
            // embedding signal carries the pair (fallback), never boosted.
            let s_kp = match (&image.keypoints, &meta.keypoints) {
                (Some(image_kp), Some(frame_kp)) => {
                    let correspondences = match_descriptors(image_kp, frame_kp);
                    ransac_inlier_ratio(
                        image_kp,
                        frame_kp,
                        &correspondences,
                        verification_seed(&image.img_id, &meta.frame_id),
                    )
                }
                _ => None,
            };

            // A defined geometric score below the floor is a
            // contradiction: the surfaces do not align.
            if s_kp.is_some_and(|kp| kp < config.inliers_min) {
                continue;
            }

            by_video.entry(meta.video_id.clone()).or_default().push(PairScore::fuse(
                image.img_id.clone(),
                meta.frame_id.clone(),
                meta.ts,
                s_deep,
                s_kp,
                config,
            ));
        }
    }

    by_video
        .into_iter()
        .filter_map(|(video_id, pairs)| {
            let accepted = evaluate_acceptance(&pairs, config)?;
            Some(AcceptedMatch {
                record: MatchRecord {
                    match_id: Uuid::new_v4(),
                    job_id: job_id.to_string(),
                    product_id: product_id.to_string(),
                    video_id,
                    best_img_id: accepted.best.img_id.clone(),
                    best_frame_id: accepted.best.frame_id.clone(),
                    ts: accepted.best.ts,
                    score: accepted.fused_score.clamp(0.0, 1.0),
                    status: MatchStatus::Accepted,
                    evidence_path: None,
                    created_at: Utc::now(),
                },
                best_score_pair: accepted.best.score_pair.clamp(0.0, 1.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_store::memory::{InMemoryCatalogStore, InMemoryMatchStore};
    use shared_store::ports::CatalogStore as _;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn image(job: &str, product: &str, img: &str, emb: Vec<f32>) -> ProductImage {
        ProductImage {
            img_id: img.into(),
            product_id: product.into(),
            job_id: job.into(),
            local_path: format!("/data/images/{img}.jpg"),
            masked_local_path: None,
            emb_rgb: Some(emb),
            emb_gray: None,
            kp_blob_path: None,
        }
    }

    fn frame(job: &str, video: &str, id: &str, ts: f64, emb: Vec<f32>) -> VideoFrame {
        VideoFrame {
            frame_id: id.into(),
            video_id: video.into(),
            job_id: job.into(),
            ts,
            local_path: format!("/data/frames/{id}.jpg"),
            masked_local_path: None,
            emb_rgb: Some(emb),
            emb_gray: None,
            kp_blob_path: None,
        }
    }

    async fn seeded_engine() -> (MatchEngine, Arc<InMemoryMatchStore>) {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        // Product p1: two images aligned with axis 0 — the match.
        catalog.upsert_product_image(image("job-1", "p1", "i1", unit(8, 0))).await.unwrap();
        catalog.upsert_product_image(image("job-1", "p1", "i2", unit(8, 0))).await.unwrap();
        // Product p2: orthogonal, never a candidate.
        catalog.upsert_product_image(image("job-1", "p2", "i3", unit(8, 3))).await.unwrap();
        // Video v1: one aligned frame at ts 12.5, others orthogonal.
        catalog.upsert_video_frame(frame("job-1", "v1", "f1", 2.0, unit(8, 5))).await.unwrap();
        catalog.upsert_video_frame(frame("job-1", "v1", "f2", 7.0, unit(8, 6))).await.unwrap();
        catalog.upsert_video_frame(frame("job-1", "v1", "f3", 12.5, unit(8, 0))).await.unwrap();
        catalog.upsert_video_frame(frame("job-1", "v1", "f4", 20.0, unit(8, 7))).await.unwrap();
        catalog.upsert_video_frame(frame("job-1", "v1", "f5", 31.0, unit(8, 4))).await.unwrap();

        let matches = Arc::new(InMemoryMatchStore::new());
        (
            MatchEngine::new(catalog, matches.clone(), MatcherConfig::default()),
            matches,
        )
    }

    fn request(job: &str) -> MatchRequest {
        MatchRequest {
            event_id: Uuid::new_v4(),
            job_id: job.into(),
            industry: "ergonomic pillows".into(),
            product_set_id: job.into(),
            video_set_id: job.into(),
            top_k: 20,
        }
    }

    #[tokio::test]
    async fn test_single_confident_match() {
        let (engine, matches) = seeded_engine().await;
        let accepted = engine.process(&request("job-1")).await.unwrap();

        assert_eq!(accepted.len(), 1);
        let record = &accepted[0].record;
        assert_eq!(record.product_id, "p1");
        assert_eq!(record.video_id, "v1");
        assert_eq!(record.best_frame_id, "f3");
        assert!((record.ts - 12.5).abs() < 1e-9);
        assert!(record.score >= 0.8);
        assert!(accepted[0].best_score_pair >= 0.88);

        // Persisted under the unique triple.
        assert!(matches.get("job-1", "p1", "v1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_sets_short_circuit() {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let matches = Arc::new(InMemoryMatchStore::new());
        let engine = MatchEngine::new(catalog, matches, MatcherConfig::default());

        let records = engine.process(&request("job-empty")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_reprocessing_upserts_not_duplicates() {
        let (engine, matches) = seeded_engine().await;
        engine.process(&request("job-1")).await.unwrap();
        engine.process(&request("job-1")).await.unwrap();
        assert_eq!(matches.for_job("job-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deterministic_accept_set() {
        let (engine, _) = seeded_engine().await;
        let first = engine.process(&request("job-1")).await.unwrap();
        let second = engine.process(&request("job-1")).await.unwrap();

        let key = |m: &AcceptedMatch| {
            (
                m.record.product_id.clone(),
                m.record.video_id.clone(),
                m.record.best_img_id.clone(),
                m.record.best_frame_id.clone(),
            )
        };
        assert_eq!(
            first.iter().map(key).collect::<Vec<_>>(),
            second.iter().map(key).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_assets_without_embeddings_skipped() {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let mut no_emb = image("job-1", "p1", "i1", vec![]);
        no_emb.emb_rgb = None;
        catalog.upsert_product_image(no_emb).await.unwrap();
        catalog
            .upsert_video_frame(frame("job-1", "v1", "f1", 1.0, unit(8, 0)))
            .await
            .unwrap();

        let matches = Arc::new(InMemoryMatchStore::new());
        let engine = MatchEngine::new(catalog, matches, MatcherConfig::default());
        let records = engine.process(&request("job-1")).await.unwrap();
        assert!(records.is_empty());
    }
}
