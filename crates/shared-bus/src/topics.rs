//! # Topic Registry
//!
//! The authoritative set of routing keys for the pipeline, with alias
//! resolution between the dotted routing-key form and the canonical
//! underscore form (`image.embeddings.completed` ↔
//! `image_embeddings_completed`). Producers in other languages use either;
//! unknown names are rejected at validation time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every topic on the `product_video_matching` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    // Phase requests (transition manager → collectors / matcher)
    ProductsCollectRequest,
    VideosSearchRequest,
    MatchRequest,

    // Collection plane (collectors → segmentor / transition manager)
    ProductsImageReady,
    ProductsImagesReadyBatch,
    ProductsCollectionsCompleted,
    VideosKeyframesReady,
    VideosKeyframesReadyBatch,
    VideosCollectionsCompleted,

    // Segmentation plane (segmentor → embedding / keypoint workers)
    ProductsImageMasked,
    ProductsImagesMaskedBatch,
    VideoKeyframesMasked,
    VideoKeyframesMaskedBatch,

    // Feature plane (embedding / keypoint workers → tracker → transition manager)
    ImageEmbeddingReady,
    ImageEmbeddingsCompleted,
    VideoEmbeddingReady,
    VideoEmbeddingsCompleted,
    ImageKeypointReady,
    ImageKeypointsCompleted,
    VideoKeypointReady,
    VideoKeypointsCompleted,

    // Matching and evidence plane
    MatchResult,
    MatchRequestCompleted,
    EvidencesGenerationCompleted,

    // Terminal notification
    JobCompleted,
}

impl Topic {
    /// All topics, used for alias resolution.
    pub const ALL: [Topic; 25] = [
        Topic::ProductsCollectRequest,
        Topic::VideosSearchRequest,
        Topic::MatchRequest,
        Topic::ProductsImageReady,
        Topic::ProductsImagesReadyBatch,
        Topic::ProductsCollectionsCompleted,
        Topic::VideosKeyframesReady,
        Topic::VideosKeyframesReadyBatch,
        Topic::VideosCollectionsCompleted,
        Topic::ProductsImageMasked,
        Topic::ProductsImagesMaskedBatch,
        Topic::VideoKeyframesMasked,
        Topic::VideoKeyframesMaskedBatch,
        Topic::ImageEmbeddingReady,
        Topic::ImageEmbeddingsCompleted,
        Topic::VideoEmbeddingReady,
        Topic::VideoEmbeddingsCompleted,
        Topic::ImageKeypointReady,
        Topic::ImageKeypointsCompleted,
        Topic::VideoKeypointReady,
        Topic::VideoKeypointsCompleted,
        Topic::MatchResult,
        Topic::MatchRequestCompleted,
        Topic::EvidencesGenerationCompleted,
        Topic::JobCompleted,
    ];

    /// The dotted routing key used on the exchange.
    #[must_use]
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::ProductsCollectRequest => "products.collect.request",
            Self::VideosSearchRequest => "videos.search.request",
            Self::MatchRequest => "match.request",
            Self::ProductsImageReady => "products.image.ready",
            Self::ProductsImagesReadyBatch => "products.images.ready.batch",
            Self::ProductsCollectionsCompleted => "products.collections.completed",
            Self::VideosKeyframesReady => "videos.keyframes.ready",
            Self::VideosKeyframesReadyBatch => "videos.keyframes.ready.batch",
            Self::VideosCollectionsCompleted => "videos.collections.completed",
            Self::ProductsImageMasked => "products.image.masked",
            Self::ProductsImagesMaskedBatch => "products.images.masked.batch",
            Self::VideoKeyframesMasked => "video.keyframes.masked",
            Self::VideoKeyframesMaskedBatch => "video.keyframes.masked.batch",
            Self::ImageEmbeddingReady => "image.embedding.ready",
            Self::ImageEmbeddingsCompleted => "image.embeddings.completed",
            Self::VideoEmbeddingReady => "video.embedding.ready",
            Self::VideoEmbeddingsCompleted => "video.embeddings.completed",
            Self::ImageKeypointReady => "image.keypoint.ready",
            Self::ImageKeypointsCompleted => "image.keypoints.completed",
            Self::VideoKeypointReady => "video.keypoint.ready",
            Self::VideoKeypointsCompleted => "video.keypoints.completed",
            Self::MatchResult => "match.result",
            Self::MatchRequestCompleted => "match.request.completed",
            Self::EvidencesGenerationCompleted => "evidences.generation.completed",
            Self::JobCompleted => "job.completed",
        }
    }

    /// The canonical underscore name (schema-registry key).
    #[must_use]
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::ProductsCollectRequest => "products_collect_request",
            Self::VideosSearchRequest => "videos_search_request",
            Self::MatchRequest => "match_request",
            Self::ProductsImageReady => "products_image_ready",
            Self::ProductsImagesReadyBatch => "products_images_ready_batch",
            Self::ProductsCollectionsCompleted => "products_collections_completed",
            Self::VideosKeyframesReady => "videos_keyframes_ready",
            Self::VideosKeyframesReadyBatch => "videos_keyframes_ready_batch",
            Self::VideosCollectionsCompleted => "videos_collections_completed",
            Self::ProductsImageMasked => "products_image_masked",
            Self::ProductsImagesMaskedBatch => "products_images_masked_batch",
            Self::VideoKeyframesMasked => "video_keyframes_masked",
            Self::VideoKeyframesMaskedBatch => "video_keyframes_masked_batch",
            Self::ImageEmbeddingReady => "image_embedding_ready",
            Self::ImageEmbeddingsCompleted => "image_embeddings_completed",
            Self::VideoEmbeddingReady => "video_embedding_ready",
            Self::VideoEmbeddingsCompleted => "video_embeddings_completed",
            Self::ImageKeypointReady => "image_keypoint_ready",
            Self::ImageKeypointsCompleted => "image_keypoints_completed",
            Self::VideoKeypointReady => "video_keypoint_ready",
            Self::VideoKeypointsCompleted => "video_keypoints_completed",
            Self::MatchResult => "match_result",
            Self::MatchRequestCompleted => "match_request_completed",
            Self::EvidencesGenerationCompleted => "evidences_generation_completed",
            Self::JobCompleted => "job_completed",
        }
    }

    /// Resolves either textual form to a topic. `None` for unknown names.
    #[must_use]
    pub fn resolve(name: &str) -> Option<Topic> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.routing_key() == name || t.canonical_name() == name)
    }

    /// The queue a subscription to this topic consumes from.
    #[must_use]
    pub fn queue_name(&self) -> String {
        format!("queue.{}", self.routing_key())
    }

    /// The dead-letter queue behind [`Topic::queue_name`].
    #[must_use]
    pub fn dlq_name(&self) -> String {
        format!("queue.{}.dlq", self.routing_key())
    }

    /// The job-level completion topics the transition manager subscribes
    /// to. These are the only events that can advance a job's phase.
    pub const JOB_LEVEL_COMPLETIONS: [Topic; 8] = [
        Topic::ProductsCollectionsCompleted,
        Topic::VideosCollectionsCompleted,
        Topic::ImageEmbeddingsCompleted,
        Topic::VideoEmbeddingsCompleted,
        Topic::ImageKeypointsCompleted,
        Topic::VideoKeypointsCompleted,
        Topic::MatchRequestCompleted,
        Topic::EvidencesGenerationCompleted,
    ];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}
