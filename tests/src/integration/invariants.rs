//! Invariant tests: exactly-once emission, idempotent handlers, the
//! zero-asset fast path, and monotonic phases under redelivery.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{unit_embedding, TestPipeline};
    use pvm_04_transition::StartJobRequest;
    use shared_bus::payloads::{AssetReady, EventPayload, ProductImagesBatch};
    use shared_bus::topics::Topic;
    use shared_store::ports::ProgressStore as _;
    use shared_types::entities::Stage;
    use std::time::Duration;
    use tokio::time::sleep;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(5);

    async fn started_job(fx: &TestPipeline) -> String {
        fx.pipeline
            .service
            .start_job(StartJobRequest {
                industry: "ergonomic pillows".into(),
                ..StartJobRequest::default()
            })
            .await
            .unwrap()
            .job_id
    }

    /// Invariant 3 — idempotent handlers: a per-asset event replayed N
    /// times counts once.
    #[tokio::test]
    async fn test_replayed_ready_event_counts_once() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.publish(EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            total_images: 10,
            watermark_ttl: None,
        }))
        .await;

        let ready = EventPayload::ImageEmbeddingReady(AssetReady {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            asset_id: "img-0".into(),
        });
        for _ in 0..5 {
            fx.publish(ready.clone()).await;
        }
        sleep(Duration::from_millis(200)).await;

        let row = fx
            .pipeline
            .stores
            .progress
            .get(&job_id, Stage::ImageEmbeddings)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.done, 1);
        assert!(!row.completion_emitted);
    }

    /// Invariant 1 — exactly-once completion emission under duplicated
    /// batches and readies.
    #[tokio::test]
    async fn test_exactly_once_completion_under_redelivery() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        let batch = EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            total_images: 2,
            watermark_ttl: None,
        });
        fx.publish(batch.clone()).await;
        fx.publish(batch).await; // redelivered

        for asset in ["img-0", "img-1"] {
            let ready = EventPayload::ImageEmbeddingReady(AssetReady {
                event_id: Uuid::new_v4(),
                job_id: job_id.clone(),
                asset_id: asset.into(),
            });
            fx.publish(ready.clone()).await;
            fx.publish(ready).await; // redelivered
        }

        fx.wait_for_events(Topic::ImageEmbeddingsCompleted, 1, WAIT).await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.recorder.count(Topic::ImageEmbeddingsCompleted), 1);
    }

    /// Invariant 5 — zero-asset fast path on both sides: the job runs to
    /// `completed` with zero match results and one completion per stage.
    #[tokio::test]
    async fn test_zero_assets_both_sides_complete() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.simulate_product_collection(&job_id, &[]).await;
        fx.simulate_video_collection(&job_id, "v-none", &[]).await;

        fx.wait_for_phase(&job_id, "completed", Duration::from_secs(8)).await;

        assert_eq!(fx.recorder.count(Topic::MatchResult), 0);
        for topic in [
            Topic::ImageEmbeddingsCompleted,
            Topic::ImageKeypointsCompleted,
            Topic::VideoEmbeddingsCompleted,
            Topic::VideoKeypointsCompleted,
            Topic::MatchRequestCompleted,
            Topic::EvidencesGenerationCompleted,
        ] {
            assert_eq!(fx.recorder.count(topic), 1, "one completion on {topic}");
        }
    }

    /// Invariant 2 — monotonic phase: the observed sequence is a prefix
    /// of the pipeline order even when completions race.
    #[tokio::test]
    async fn test_phase_never_regresses() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.simulate_product_collection(
            &job_id,
            &[("p1", vec![("i1", unit_embedding(8, 0))])],
        )
        .await;
        fx.simulate_video_collection(&job_id, "v1", &[("f1", 3.0, unit_embedding(8, 1))])
            .await;
        fx.wait_for_phase(&job_id, "feature_extraction", WAIT).await;

        // A late, duplicate collection completion must not move the job
        // backwards or forwards.
        fx.publish(EventPayload::ProductsCollectionsCompleted(
            shared_bus::payloads::JobCompletion {
                event_id: Uuid::new_v4(),
                job_id: job_id.clone(),
            },
        ))
        .await;
        sleep(Duration::from_millis(200)).await;

        let status = fx.pipeline.service.get_status(&job_id).await.unwrap();
        assert_eq!(status.phase, "feature_extraction");
    }
}
