//! # Core Entities
//!
//! Persisted entities of the matching pipeline. Implementers of the storage
//! ports own the physical layout; these structs are the logical rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A deep-embedding vector (CLIP-style). `None` on a row means the feature
/// has not been produced for that asset ("feature absent" signal).
pub type Embedding = Vec<f32>;

/// Coarse-grained job state.
///
/// The phase advances only along
/// `collection → feature_extraction → matching → evidence → completed`;
/// `failed` and `cancelled` are reachable from any non-terminal phase and
/// are terminal themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Collecting product listings and videos.
    Collection,
    /// Segmentation, embedding, and keypoint extraction.
    FeatureExtraction,
    /// Vector retrieval + geometric verification.
    Matching,
    /// Evidence artifact generation.
    Evidence,
    /// Terminal: pipeline finished.
    Completed,
    /// Terminal: unrecoverable job error.
    Failed,
    /// Terminal: cancelled by the user.
    Cancelled,
}

impl JobPhase {
    /// Stable string form used in status responses and receipts.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::FeatureExtraction => "feature_extraction",
            Self::Matching => "matching",
            Self::Evidence => "evidence",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the phase accepts no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Progress percentage reported by status queries.
    ///
    /// Unknown jobs are reported as `("unknown", 0)` by the job service;
    /// that case has no `JobPhase` value.
    #[must_use]
    pub fn percent(&self) -> u8 {
        match self {
            Self::Collection => 20,
            Self::FeatureExtraction => 50,
            Self::Matching => 80,
            Self::Evidence => 90,
            Self::Completed => 100,
            Self::Failed | Self::Cancelled => 0,
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video platforms accepted by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Bilibili,
}

/// Product marketplaces accepted by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Amazon,
    Ebay,
}

/// Per-job aggregation stages tracked by the feature tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Product images awaiting segmentation.
    ProductsImages,
    /// Video keyframes awaiting segmentation.
    VideoKeyframes,
    /// Deep embeddings over masked product images.
    ImageEmbeddings,
    /// Keypoint extraction over masked product images.
    ImageKeypoints,
    /// Deep embeddings over masked video keyframes.
    VideoEmbeddings,
    /// Keypoint extraction over masked video keyframes.
    VideoKeypoints,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::ProductsImages,
        Stage::VideoKeyframes,
        Stage::ImageEmbeddings,
        Stage::ImageKeypoints,
        Stage::VideoEmbeddings,
        Stage::VideoKeypoints,
    ];

    /// Stable string form used as part of progress-row keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductsImages => "products_images",
            Self::VideoKeyframes => "video_keyframes",
            Self::ImageEmbeddings => "image_embeddings",
            Self::ImageKeypoints => "image_keypoints",
            Self::VideoEmbeddings => "video_embeddings",
            Self::VideoKeypoints => "video_keypoints",
        }
    }

    /// Whether the stage aggregates product-side assets.
    #[must_use]
    pub fn is_product_side(&self) -> bool {
        matches!(
            self,
            Self::ProductsImages | Self::ImageEmbeddings | Self::ImageKeypoints
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which asset sides a job actually collects.
///
/// A products-only or videos-only job relaxes the barrier sets of the
/// transition manager accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTypes {
    /// The job collects products (Amazon/eBay listings).
    pub products: bool,
    /// The job collects videos.
    pub videos: bool,
}

impl Default for AssetTypes {
    fn default() -> Self {
        Self {
            products: true,
            videos: true,
        }
    }
}

/// The search inputs a job was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQuery {
    /// Industry keyword, e.g. "ergonomic pillows".
    pub industry: String,
    /// Top-N Amazon listings to collect, in `[1, 100]`.
    pub top_amz: u32,
    /// Top-N eBay listings to collect, in `[1, 100]`.
    pub top_ebay: u32,
    /// Search queries per language code, e.g. `{"en": ["pillow review"]}`.
    pub queries: HashMap<String, Vec<String>>,
    /// Video platforms to crawl.
    pub platforms: Vec<Platform>,
    /// Recency window for videos, in days, `[1, 365]`.
    pub recency_days: u32,
}

/// Asset counters surfaced by status queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub products: u64,
    pub videos: u64,
    pub images: u64,
    pub frames: u64,
}

/// A matching job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUIDv4, stringified on the wire.
    pub job_id: String,
    /// Current phase; mutated only by the transition manager.
    pub phase: JobPhase,
    /// Query inputs the job was started with.
    pub query: JobQuery,
    /// Asset sides this job collects.
    pub asset_types: AssetTypes,
    /// Asset counters.
    pub counts: JobCounts,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancellation_notes: Option<String>,
    /// Set when the phase becomes `failed`; artifacts are retained.
    pub failure_reason: Option<String>,
}

impl Job {
    /// Creates a job in the `collection` phase.
    #[must_use]
    pub fn new(query: JobQuery, asset_types: AssetTypes) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            phase: JobPhase::Collection,
            query,
            asset_types,
            counts: JobCounts::default(),
            started_at: now,
            updated_at: now,
            cancelled_at: None,
            cancellation_reason: None,
            cancellation_notes: None,
            failure_reason: None,
        }
    }
}

/// A collected e-commerce product listing. Written once by the collector,
/// read by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub job_id: String,
    pub src: Marketplace,
    pub asin_or_itemid: String,
    pub title: String,
    pub brand: Option<String>,
    pub url: String,
    pub marketplace: String,
    pub price: Option<f64>,
}

/// An image of a product. Feature columns are filled in by downstream
/// workers; `None` means the feature was never produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImage {
    pub img_id: String,
    pub product_id: String,
    pub job_id: String,
    /// Absolute path under the blob root.
    pub local_path: String,
    pub masked_local_path: Option<String>,
    pub emb_rgb: Option<Embedding>,
    pub emb_gray: Option<Embedding>,
    pub kp_blob_path: Option<String>,
}

/// A collected short video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub job_id: String,
    pub platform: Platform,
    pub url: String,
    pub title: String,
    pub duration_s: f64,
    pub published_at: Option<DateTime<Utc>>,
    pub frame_count: u64,
}

/// A keyframe extracted from a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub frame_id: String,
    pub video_id: String,
    pub job_id: String,
    /// Timestamp within the video, seconds.
    pub ts: f64,
    /// Absolute path under the blob root.
    pub local_path: String,
    pub masked_local_path: Option<String>,
    pub emb_rgb: Option<Embedding>,
    pub emb_gray: Option<Embedding>,
    pub kp_blob_path: Option<String>,
}

/// Status of a persisted match. Only accepted pairs are ever persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Accepted,
}

/// An accepted (product, video) match.
///
/// Unique on `(job_id, product_id, video_id)`: one accepted pair per
/// product-video within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: Uuid,
    pub job_id: String,
    pub product_id: String,
    pub video_id: String,
    pub best_img_id: String,
    pub best_frame_id: String,
    /// Frame timestamp of the best pair, seconds.
    pub ts: f64,
    /// Fused product-video score in `[0, 1]`.
    pub score: f64,
    pub status: MatchStatus,
    pub evidence_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-`(job_id, stage)` aggregation counters.
///
/// Invariants:
/// - `done <= expected` when `expected_known`;
/// - `completion_emitted` transitions `false → true` exactly once;
/// - `done` is monotonically non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub stage: Stage,
    /// Announced batch total. Meaningless until `expected_known`.
    pub expected: u64,
    pub done: u64,
    pub failed: u64,
    pub expected_known: bool,
    pub completion_emitted: bool,
    /// When the watermark lapses and a partial completion is emitted.
    pub watermark_expires_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// Fresh row in the initial aggregation state.
    #[must_use]
    pub fn new(job_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            expected: 0,
            done: 0,
            failed: 0,
            expected_known: false,
            completion_emitted: false,
            watermark_expires_at: None,
        }
    }

    /// `done < expected` at emission time means degraded success.
    #[must_use]
    pub fn has_partial_completion(&self) -> bool {
        self.done < self.expected
    }
}

/// Identity of a pipeline worker, used in logs and correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerId {
    FeatureTracker,
    Matcher,
    EvidenceBuilder,
    TransitionManager,
    ProductCollector,
    VideoCrawler,
    Segmentor,
    EmbeddingWorker,
    KeypointWorker,
}

impl WorkerId {
    /// Short name used in structured log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FeatureTracker => "feature-tracker",
            Self::Matcher => "matcher",
            Self::EvidenceBuilder => "evidence-builder",
            Self::TransitionManager => "transition-manager",
            Self::ProductCollector => "product-collector",
            Self::VideoCrawler => "video-crawler",
            Self::Segmentor => "segmentor",
            Self::EmbeddingWorker => "embedding-worker",
            Self::KeypointWorker => "keypoint-worker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_percent_mapping() {
        assert_eq!(JobPhase::Collection.percent(), 20);
        assert_eq!(JobPhase::FeatureExtraction.percent(), 50);
        assert_eq!(JobPhase::Matching.percent(), 80);
        assert_eq!(JobPhase::Evidence.percent(), 90);
        assert_eq!(JobPhase::Completed.percent(), 100);
        assert_eq!(JobPhase::Failed.percent(), 0);
        assert_eq!(JobPhase::Cancelled.percent(), 0);
    }

    #[test]
    fn test_phase_terminality() {
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(JobPhase::Cancelled.is_terminal());
        assert!(!JobPhase::Collection.is_terminal());
        assert!(!JobPhase::Matching.is_terminal());
    }

    #[test]
    fn test_phase_serde_snake_case() {
        let json = serde_json::to_string(&JobPhase::FeatureExtraction).unwrap();
        assert_eq!(json, "\"feature_extraction\"");
    }

    #[test]
    fn test_stage_names_stable() {
        assert_eq!(Stage::ProductsImages.as_str(), "products_images");
        assert_eq!(Stage::VideoKeypoints.as_str(), "video_keypoints");
        assert_eq!(Stage::ALL.len(), 6);
    }

    #[test]
    fn test_new_job_starts_in_collection() {
        let query = JobQuery {
            industry: "ergonomic pillows".to_string(),
            top_amz: 2,
            top_ebay: 1,
            queries: HashMap::new(),
            platforms: vec![Platform::Youtube],
            recency_days: 30,
        };
        let job = Job::new(query, AssetTypes::default());
        assert_eq!(job.phase, JobPhase::Collection);
        assert!(job.cancelled_at.is_none());
        assert!(uuid::Uuid::parse_str(&job.job_id).is_ok());
    }

    #[test]
    fn test_progress_partial_flag() {
        let mut p = JobProgress::new("job-1", Stage::ImageEmbeddings);
        p.expected = 20;
        p.expected_known = true;
        p.done = 18;
        assert!(p.has_partial_completion());
        p.done = 20;
        assert!(!p.has_partial_completion());
    }
}
