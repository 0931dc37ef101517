//! # Event Payloads
//!
//! One struct per topic schema. Required fields are strict; unknown JSON
//! fields are accepted everywhere (forward compatibility), which is why no
//! struct uses `deny_unknown_fields`.

use crate::topics::Topic;
use serde::{Deserialize, Serialize};
use shared_types::entities::{JobCounts, Platform};
use std::collections::HashMap;
use uuid::Uuid;

/// `products.collect.request` — start product collection for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsCollectRequest {
    pub event_id: Uuid,
    pub job_id: String,
    /// Queries per language; `en` is required.
    pub queries: HashMap<String, Vec<String>>,
    /// `[1, 100]`.
    pub top_amz: u32,
    /// `[1, 100]`.
    pub top_ebay: u32,
}

/// `videos.search.request` — start video crawling for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideosSearchRequest {
    pub event_id: Uuid,
    pub job_id: String,
    pub industry: String,
    pub queries: HashMap<String, Vec<String>>,
    pub platforms: Vec<Platform>,
    /// `[1, 365]`.
    pub recency_days: u32,
}

/// `products.image.ready` — one collected product image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImageReady {
    pub event_id: Uuid,
    pub job_id: String,
    pub product_id: String,
    pub image_id: String,
    pub local_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Batch total for product images; used by both
/// `products.images.ready.batch` and `products.images.masked.batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImagesBatch {
    pub event_id: Uuid,
    pub job_id: String,
    pub total_images: u64,
    /// Seconds to wait for stragglers before a partial completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_ttl: Option<u64>,
}

/// A keyframe reference inside `videos.keyframes.ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeRef {
    pub frame_id: String,
    /// Seconds into the video.
    pub ts: f64,
    pub local_path: String,
}

/// `videos.keyframes.ready` — keyframes extracted from one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoKeyframesReady {
    pub event_id: Uuid,
    pub job_id: String,
    pub video_id: String,
    pub frames: Vec<KeyframeRef>,
}

/// Batch total for video keyframes; used by both
/// `videos.keyframes.ready.batch` and `video.keyframes.masked.batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoKeyframesBatch {
    pub event_id: Uuid,
    pub job_id: String,
    pub total_keyframes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_ttl: Option<u64>,
}

/// `products.image.masked` — one segmented product image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImageMasked {
    pub event_id: Uuid,
    pub job_id: String,
    pub image_id: String,
    pub mask_path: String,
}

/// A masked keyframe reference inside `video.keyframes.masked`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedKeyframeRef {
    pub frame_id: String,
    pub ts: f64,
    pub mask_path: String,
}

/// `video.keyframes.masked` — segmented keyframes of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoKeyframesMasked {
    pub event_id: Uuid,
    pub job_id: String,
    pub video_id: String,
    pub frames: Vec<MaskedKeyframeRef>,
}

/// Per-asset feature completion, shared by the four `*.ready` feature
/// topics (`image.embedding.ready`, `video.embedding.ready`,
/// `image.keypoint.ready`, `video.keypoint.ready`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetReady {
    pub event_id: Uuid,
    pub job_id: String,
    pub asset_id: String,
}

/// Per-job stage completion, shared by the four feature `*.completed`
/// topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCompleted {
    pub event_id: Uuid,
    pub job_id: String,
    pub total_assets: u64,
    pub processed_assets: u64,
    pub failed_assets: u64,
    pub has_partial_completion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_ttl: Option<u64>,
}

/// Bare job-level completion (`products.collections.completed`,
/// `videos.collections.completed`, `evidences.generation.completed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub event_id: Uuid,
    pub job_id: String,
}

/// `match.request` — run the matcher over a job's collected sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub event_id: Uuid,
    pub job_id: String,
    pub industry: String,
    pub product_set_id: String,
    pub video_set_id: String,
    /// `[1, 100]`.
    pub top_k: u32,
}

/// The best-scoring (image, frame) pair of an accepted match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPair {
    pub img_id: String,
    pub frame_id: String,
    /// `[0, 1]`.
    pub score_pair: f64,
}

/// `match.result` — one accepted (product, video) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub event_id: Uuid,
    pub job_id: String,
    pub product_id: String,
    pub video_id: String,
    pub best_pair: BestPair,
    /// Fused product-video score, `[0, 1]`.
    pub score: f64,
    /// Best pair's frame timestamp, seconds, `>= 0`.
    pub ts: f64,
}

/// `match.request.completed` — the matcher finished a job's cross-product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequestCompleted {
    pub event_id: Uuid,
    pub job_id: String,
    /// Accepted pairs announced to the evidence coordinator; `0` takes the
    /// zero-match fast path.
    pub match_count: u64,
}

/// `job.completed` — terminal notification for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompleted {
    pub event_id: Uuid,
    pub job_id: String,
    pub phase: String,
    pub counts: JobCounts,
}

/// A validated event, one variant per topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    ProductsCollectRequest(ProductsCollectRequest),
    VideosSearchRequest(VideosSearchRequest),
    ProductsImageReady(ProductImageReady),
    ProductsImagesReadyBatch(ProductImagesBatch),
    ProductsCollectionsCompleted(JobCompletion),
    VideosKeyframesReady(VideoKeyframesReady),
    VideosKeyframesReadyBatch(VideoKeyframesBatch),
    VideosCollectionsCompleted(JobCompletion),
    ProductsImageMasked(ProductImageMasked),
    ProductsImagesMaskedBatch(ProductImagesBatch),
    VideoKeyframesMasked(VideoKeyframesMasked),
    VideoKeyframesMaskedBatch(VideoKeyframesBatch),
    ImageEmbeddingReady(AssetReady),
    ImageEmbeddingsCompleted(StageCompleted),
    VideoEmbeddingReady(AssetReady),
    VideoEmbeddingsCompleted(StageCompleted),
    ImageKeypointReady(AssetReady),
    ImageKeypointsCompleted(StageCompleted),
    VideoKeypointReady(AssetReady),
    VideoKeypointsCompleted(StageCompleted),
    MatchRequest(MatchRequest),
    MatchResult(MatchResult),
    MatchRequestCompleted(MatchRequestCompleted),
    EvidencesGenerationCompleted(JobCompletion),
    JobCompleted(JobCompleted),
}

impl EventPayload {
    /// The topic this payload is published under.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            Self::ProductsCollectRequest(_) => Topic::ProductsCollectRequest,
            Self::VideosSearchRequest(_) => Topic::VideosSearchRequest,
            Self::ProductsImageReady(_) => Topic::ProductsImageReady,
            Self::ProductsImagesReadyBatch(_) => Topic::ProductsImagesReadyBatch,
            Self::ProductsCollectionsCompleted(_) => Topic::ProductsCollectionsCompleted,
            Self::VideosKeyframesReady(_) => Topic::VideosKeyframesReady,
            Self::VideosKeyframesReadyBatch(_) => Topic::VideosKeyframesReadyBatch,
            Self::VideosCollectionsCompleted(_) => Topic::VideosCollectionsCompleted,
            Self::ProductsImageMasked(_) => Topic::ProductsImageMasked,
            Self::ProductsImagesMaskedBatch(_) => Topic::ProductsImagesMaskedBatch,
            Self::VideoKeyframesMasked(_) => Topic::VideoKeyframesMasked,
            Self::VideoKeyframesMaskedBatch(_) => Topic::VideoKeyframesMaskedBatch,
            Self::ImageEmbeddingReady(_) => Topic::ImageEmbeddingReady,
            Self::ImageEmbeddingsCompleted(_) => Topic::ImageEmbeddingsCompleted,
            Self::VideoEmbeddingReady(_) => Topic::VideoEmbeddingReady,
            Self::VideoEmbeddingsCompleted(_) => Topic::VideoEmbeddingsCompleted,
            Self::ImageKeypointReady(_) => Topic::ImageKeypointReady,
            Self::ImageKeypointsCompleted(_) => Topic::ImageKeypointsCompleted,
            Self::VideoKeypointReady(_) => Topic::VideoKeypointReady,
            Self::VideoKeypointsCompleted(_) => Topic::VideoKeypointsCompleted,
            Self::MatchRequest(_) => Topic::MatchRequest,
            Self::MatchResult(_) => Topic::MatchResult,
            Self::MatchRequestCompleted(_) => Topic::MatchRequestCompleted,
            Self::EvidencesGenerationCompleted(_) => Topic::EvidencesGenerationCompleted,
            Self::JobCompleted(_) => Topic::JobCompleted,
        }
    }

    /// The idempotency key of this event.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::ProductsCollectRequest(p) => p.event_id,
            Self::VideosSearchRequest(p) => p.event_id,
            Self::ProductsImageReady(p) => p.event_id,
            Self::ProductsImagesReadyBatch(p) | Self::ProductsImagesMaskedBatch(p) => p.event_id,
            Self::ProductsCollectionsCompleted(p)
            | Self::VideosCollectionsCompleted(p)
            | Self::EvidencesGenerationCompleted(p) => p.event_id,
            Self::VideosKeyframesReady(p) => p.event_id,
            Self::VideosKeyframesReadyBatch(p) | Self::VideoKeyframesMaskedBatch(p) => p.event_id,
            Self::ProductsImageMasked(p) => p.event_id,
            Self::VideoKeyframesMasked(p) => p.event_id,
            Self::ImageEmbeddingReady(p)
            | Self::VideoEmbeddingReady(p)
            | Self::ImageKeypointReady(p)
            | Self::VideoKeypointReady(p) => p.event_id,
            Self::ImageEmbeddingsCompleted(p)
            | Self::VideoEmbeddingsCompleted(p)
            | Self::ImageKeypointsCompleted(p)
            | Self::VideoKeypointsCompleted(p) => p.event_id,
            Self::MatchRequest(p) => p.event_id,
            Self::MatchResult(p) => p.event_id,
            Self::MatchRequestCompleted(p) => p.event_id,
            Self::JobCompleted(p) => p.event_id,
        }
    }

    /// The job this event belongs to.
    #[must_use]
    pub fn job_id(&self) -> &str {
        match self {
            Self::ProductsCollectRequest(p) => &p.job_id,
            Self::VideosSearchRequest(p) => &p.job_id,
            Self::ProductsImageReady(p) => &p.job_id,
            Self::ProductsImagesReadyBatch(p) | Self::ProductsImagesMaskedBatch(p) => &p.job_id,
            Self::ProductsCollectionsCompleted(p)
            | Self::VideosCollectionsCompleted(p)
            | Self::EvidencesGenerationCompleted(p) => &p.job_id,
            Self::VideosKeyframesReady(p) => &p.job_id,
            Self::VideosKeyframesReadyBatch(p) | Self::VideoKeyframesMaskedBatch(p) => &p.job_id,
            Self::ProductsImageMasked(p) => &p.job_id,
            Self::VideoKeyframesMasked(p) => &p.job_id,
            Self::ImageEmbeddingReady(p)
            | Self::VideoEmbeddingReady(p)
            | Self::ImageKeypointReady(p)
            | Self::VideoKeypointReady(p) => &p.job_id,
            Self::ImageEmbeddingsCompleted(p)
            | Self::VideoEmbeddingsCompleted(p)
            | Self::ImageKeypointsCompleted(p)
            | Self::VideoKeypointsCompleted(p) => &p.job_id,
            Self::MatchRequest(p) => &p.job_id,
            Self::MatchResult(p) => &p.job_id,
            Self::MatchRequestCompleted(p) => &p.job_id,
            Self::JobCompleted(p) => &p.job_id,
        }
    }
}
