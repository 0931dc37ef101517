//! Stage-to-topic wiring.
//!
//! Maps every batch/ready topic the tracker consumes onto the stages it
//! seeds or increments, and builds the completion payloads the tracker
//! emits. A masked batch seeds two stages: the embedding and keypoint
//! workers both gate on the same masked total.

use super::progress::CompletionSummary;
use shared_bus::payloads::{EventPayload, ProductImagesBatch, StageCompleted, VideoKeyframesBatch};
use shared_bus::topics::Topic;
use shared_types::entities::Stage;
use uuid::Uuid;

/// Stages seeded by a batch arriving on `topic`.
#[must_use]
pub fn stage_for_batch(topic: Topic) -> &'static [Stage] {
    match topic {
        Topic::ProductsImagesReadyBatch => &[Stage::ProductsImages],
        Topic::VideosKeyframesReadyBatch => &[Stage::VideoKeyframes],
        Topic::ProductsImagesMaskedBatch => &[Stage::ImageEmbeddings, Stage::ImageKeypoints],
        Topic::VideoKeyframesMaskedBatch => &[Stage::VideoEmbeddings, Stage::VideoKeypoints],
        _ => &[],
    }
}

/// The stage a per-asset ready event on `topic` increments.
#[must_use]
pub fn stage_for_ready(topic: Topic) -> Option<Stage> {
    match topic {
        Topic::ProductsImageReady => Some(Stage::ProductsImages),
        Topic::VideosKeyframesReady => Some(Stage::VideoKeyframes),
        Topic::ImageEmbeddingReady => Some(Stage::ImageEmbeddings),
        Topic::ImageKeypointReady => Some(Stage::ImageKeypoints),
        Topic::VideoEmbeddingReady => Some(Stage::VideoEmbeddings),
        Topic::VideoKeypointReady => Some(Stage::VideoKeypoints),
        _ => None,
    }
}

/// Builds the per-job completion event for a feature stage. Segmentation
/// input stages have no completion topic of their own and return `None`.
#[must_use]
pub fn completion_payload(
    stage: Stage,
    job_id: &str,
    summary: &CompletionSummary,
    watermark_ttl: u64,
) -> Option<EventPayload> {
    let completed = StageCompleted {
        event_id: Uuid::new_v4(),
        job_id: job_id.to_string(),
        total_assets: summary.total_assets,
        processed_assets: summary.processed_assets,
        failed_assets: summary.failed_assets,
        has_partial_completion: summary.has_partial_completion,
        watermark_ttl: Some(watermark_ttl),
    };
    match stage {
        Stage::ImageEmbeddings => Some(EventPayload::ImageEmbeddingsCompleted(completed)),
        Stage::ImageKeypoints => Some(EventPayload::ImageKeypointsCompleted(completed)),
        Stage::VideoEmbeddings => Some(EventPayload::VideoEmbeddingsCompleted(completed)),
        Stage::VideoKeypoints => Some(EventPayload::VideoKeypointsCompleted(completed)),
        Stage::ProductsImages | Stage::VideoKeyframes => None,
    }
}

/// The zero-asset forward: a ready batch announcing zero assets publishes
/// the corresponding masked batch with zero total, so downstream feature
/// stages complete without waiting for a segmentor that has nothing to do.
#[must_use]
pub fn zero_masked_forward(topic: Topic, job_id: &str, watermark_ttl: Option<u64>) -> Option<EventPayload> {
    match topic {
        Topic::ProductsImagesReadyBatch => {
            Some(EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
                event_id: Uuid::new_v4(),
                job_id: job_id.to_string(),
                total_images: 0,
                watermark_ttl,
            }))
        }
        Topic::VideosKeyframesReadyBatch => {
            Some(EventPayload::VideoKeyframesMaskedBatch(VideoKeyframesBatch {
                event_id: Uuid::new_v4(),
                job_id: job_id.to_string(),
                total_keyframes: 0,
                watermark_ttl,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_batch_seeds_both_feature_stages() {
        assert_eq!(
            stage_for_batch(Topic::ProductsImagesMaskedBatch),
            &[Stage::ImageEmbeddings, Stage::ImageKeypoints]
        );
        assert_eq!(
            stage_for_batch(Topic::VideoKeyframesMaskedBatch),
            &[Stage::VideoEmbeddings, Stage::VideoKeypoints]
        );
    }

    #[test]
    fn test_non_batch_topics_seed_nothing() {
        assert!(stage_for_batch(Topic::MatchRequest).is_empty());
        assert!(stage_for_ready(Topic::MatchRequest).is_none());
    }

    #[test]
    fn test_segmentation_stages_have_no_completion_topic() {
        let summary = CompletionSummary {
            total_assets: 0,
            processed_assets: 0,
            failed_assets: 0,
            has_partial_completion: false,
        };
        assert!(completion_payload(Stage::ProductsImages, "job-1", &summary, 300).is_none());
        assert!(completion_payload(Stage::ImageEmbeddings, "job-1", &summary, 300).is_some());
    }

    #[test]
    fn test_zero_forward_targets_masked_batches() {
        let fwd = zero_masked_forward(Topic::ProductsImagesReadyBatch, "job-1", None).unwrap();
        assert_eq!(fwd.topic(), Topic::ProductsImagesMaskedBatch);
        let fwd = zero_masked_forward(Topic::VideosKeyframesReadyBatch, "job-1", Some(60)).unwrap();
        assert_eq!(fwd.topic(), Topic::VideoKeyframesMaskedBatch);
        assert!(zero_masked_forward(Topic::ProductsImagesMaskedBatch, "job-1", None).is_none());
    }
}
