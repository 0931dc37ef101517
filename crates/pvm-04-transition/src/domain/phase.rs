//! The barrier table: which completions gate which transition.
//!
//! Evaluation is a single pure function over the recorded receipt names,
//! invoked after every completion arrival. The `UNIQUE(job_id, name)`
//! receipt constraint upstream makes duplicate arrivals harmless here.

use shared_bus::topics::Topic;
use shared_types::entities::{AssetTypes, JobPhase};

/// The completions that must all be recorded before the job leaves
/// `phase`, narrowed to the asset sides the job collects.
///
/// Terminal phases gate on nothing.
#[must_use]
pub fn required_completions(phase: JobPhase, asset_types: AssetTypes) -> Vec<Topic> {
    let mut required = Vec::new();
    match phase {
        JobPhase::Collection => {
            if asset_types.products {
                required.push(Topic::ProductsCollectionsCompleted);
            }
            if asset_types.videos {
                required.push(Topic::VideosCollectionsCompleted);
            }
        }
        JobPhase::FeatureExtraction => {
            if asset_types.products {
                required.push(Topic::ImageEmbeddingsCompleted);
                required.push(Topic::ImageKeypointsCompleted);
            }
            if asset_types.videos {
                required.push(Topic::VideoEmbeddingsCompleted);
                required.push(Topic::VideoKeypointsCompleted);
            }
        }
        JobPhase::Matching => required.push(Topic::MatchRequestCompleted),
        JobPhase::Evidence => required.push(Topic::EvidencesGenerationCompleted),
        JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled => {}
    }
    required
}

/// The phase entered when the barrier of `phase` is met.
#[must_use]
pub fn next_phase(phase: JobPhase) -> Option<JobPhase> {
    match phase {
        JobPhase::Collection => Some(JobPhase::FeatureExtraction),
        JobPhase::FeatureExtraction => Some(JobPhase::Matching),
        JobPhase::Matching => Some(JobPhase::Evidence),
        JobPhase::Evidence => Some(JobPhase::Completed),
        JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled => None,
    }
}

/// Whether every required completion of `phase` appears among the
/// recorded receipt names (routing-key form).
#[must_use]
pub fn barrier_met(phase: JobPhase, asset_types: AssetTypes, received: &[String]) -> bool {
    let required = required_completions(phase, asset_types);
    if required.is_empty() {
        return false;
    }
    required
        .iter()
        .all(|topic| received.iter().any(|name| name == topic.routing_key()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn both() -> AssetTypes {
        AssetTypes {
            products: true,
            videos: true,
        }
    }

    fn products_only() -> AssetTypes {
        AssetTypes {
            products: true,
            videos: false,
        }
    }

    fn names(topics: &[Topic]) -> Vec<String> {
        topics.iter().map(|t| t.routing_key().to_string()).collect()
    }

    #[test]
    fn test_collection_barrier_needs_both_sides() {
        let received = names(&[Topic::ProductsCollectionsCompleted]);
        assert!(!barrier_met(JobPhase::Collection, both(), &received));

        let received = names(&[
            Topic::ProductsCollectionsCompleted,
            Topic::VideosCollectionsCompleted,
        ]);
        assert!(barrier_met(JobPhase::Collection, both(), &received));
    }

    #[test]
    fn test_products_only_relaxes_barriers() {
        let received = names(&[Topic::ProductsCollectionsCompleted]);
        assert!(barrier_met(JobPhase::Collection, products_only(), &received));

        let received = names(&[
            Topic::ImageEmbeddingsCompleted,
            Topic::ImageKeypointsCompleted,
        ]);
        assert!(barrier_met(
            JobPhase::FeatureExtraction,
            products_only(),
            &received
        ));
        // The same receipts do not satisfy a both-sides job.
        assert!(!barrier_met(JobPhase::FeatureExtraction, both(), &received));
    }

    #[test]
    fn test_feature_barrier_needs_all_four() {
        let received = names(&[
            Topic::ImageEmbeddingsCompleted,
            Topic::ImageKeypointsCompleted,
            Topic::VideoEmbeddingsCompleted,
        ]);
        assert!(!barrier_met(JobPhase::FeatureExtraction, both(), &received));

        let received = names(&[
            Topic::ImageEmbeddingsCompleted,
            Topic::ImageKeypointsCompleted,
            Topic::VideoEmbeddingsCompleted,
            Topic::VideoKeypointsCompleted,
        ]);
        assert!(barrier_met(JobPhase::FeatureExtraction, both(), &received));
    }

    #[test]
    fn test_terminal_phases_never_transition() {
        for phase in [JobPhase::Completed, JobPhase::Failed, JobPhase::Cancelled] {
            assert!(next_phase(phase).is_none());
            assert!(required_completions(phase, both()).is_empty());
            assert!(!barrier_met(phase, both(), &names(&Topic::JOB_LEVEL_COMPLETIONS)));
        }
    }

    #[test]
    fn test_phase_sequence() {
        assert_eq!(
            next_phase(JobPhase::Collection),
            Some(JobPhase::FeatureExtraction)
        );
        assert_eq!(
            next_phase(JobPhase::FeatureExtraction),
            Some(JobPhase::Matching)
        );
        assert_eq!(next_phase(JobPhase::Matching), Some(JobPhase::Evidence));
        assert_eq!(next_phase(JobPhase::Evidence), Some(JobPhase::Completed));
    }
}
