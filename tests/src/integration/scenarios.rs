//! End-to-end scenarios over the full pipeline.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{unit_embedding, TestPipeline};
    use pvm_04_transition::StartJobRequest;
    use shared_bus::payloads::{EventPayload, MatchRequest, MatchRequestCompleted, ProductImagesBatch};
    use shared_bus::topics::Topic;
    use shared_store::ports::{JobStore as _, MatchStore as _, PhaseEventStore as _};
    use shared_types::entities::JobPhase;
    use std::time::Duration;
    use tokio::time::sleep;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(5);

    fn start_request() -> StartJobRequest {
        StartJobRequest {
            industry: "ergonomic pillows".into(),
            top_amz: Some(2),
            top_ebay: Some(1),
            ..StartJobRequest::default()
        }
    }

    async fn started_job(fx: &TestPipeline) -> String {
        fx.pipeline
            .service
            .start_job(start_request())
            .await
            .unwrap()
            .job_id
    }

    /// S1 — happy path: both sides populated, exactly one product's
    /// images align with one frame at ts 12.5.
    #[tokio::test]
    async fn test_s1_happy_path() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        // 3 products, 2 images each; only p1 aligns with frame f3.
        fx.simulate_product_collection(
            &job_id,
            &[
                ("p1", vec![("i1", unit_embedding(8, 0)), ("i2", unit_embedding(8, 0))]),
                ("p2", vec![("i3", unit_embedding(8, 2)), ("i4", unit_embedding(8, 2))]),
                ("p3", vec![("i5", unit_embedding(8, 3)), ("i6", unit_embedding(8, 3))]),
            ],
        )
        .await;
        // 1 video, 5 frames; f3 at ts 12.5 is the aligned one.
        fx.simulate_video_collection(
            &job_id,
            "v1",
            &[
                ("f1", 2.0, unit_embedding(8, 4)),
                ("f2", 7.0, unit_embedding(8, 5)),
                ("f3", 12.5, unit_embedding(8, 0)),
                ("f4", 20.0, unit_embedding(8, 6)),
                ("f5", 31.0, unit_embedding(8, 7)),
            ],
        )
        .await;
        fx.wait_for_phase(&job_id, "feature_extraction", WAIT).await;

        fx.simulate_feature_extraction(
            &job_id,
            &["i1", "i2", "i3", "i4", "i5", "i6"],
            &["f1", "f2", "f3", "f4", "f5"],
        )
        .await;
        fx.wait_for_phase(&job_id, "completed", WAIT).await;

        // Exactly one confident match, once.
        assert_eq!(fx.recorder.count(Topic::MatchResult), 1);
        assert_eq!(fx.recorder.count(Topic::MatchRequestCompleted), 1);
        let result = match &fx.recorder.payloads(Topic::MatchResult)[0] {
            EventPayload::MatchResult(r) => r.clone(),
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(result.product_id, "p1");
        assert_eq!(result.video_id, "v1");
        assert!(result.score >= 0.8);
        assert!((result.ts - 12.5).abs() < 1e-9);

        // One persisted row with the evidence artifact attached.
        let matches = fx.pipeline.stores.matches.for_job(&job_id).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!((matches[0].ts - 12.5).abs() < 1e-9);
        assert!(matches[0].evidence_path.is_some());

        let status = fx.pipeline.service.get_status(&job_id).await.unwrap();
        assert_eq!(status.percent, 100);
        assert_eq!(status.counts.products, 3);
        assert_eq!(status.counts.videos, 1);
        assert_eq!(status.counts.images, 6);
        assert_eq!(status.counts.frames, 5);
    }

    /// S2 — zero products: the job still completes, with zero-count
    /// image completions and zero match results.
    #[tokio::test]
    async fn test_s2_zero_products() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        // Product collector found nothing.
        fx.simulate_product_collection(&job_id, &[]).await;
        // Video side is normal.
        fx.simulate_video_collection(
            &job_id,
            "v1",
            &[
                ("f1", 1.0, unit_embedding(8, 1)),
                ("f2", 2.0, unit_embedding(8, 2)),
            ],
        )
        .await;
        fx.wait_for_phase(&job_id, "feature_extraction", WAIT).await;

        fx.simulate_feature_extraction(&job_id, &[], &["f1", "f2"]).await;
        fx.wait_for_phase(&job_id, "completed", WAIT).await;

        // Image-side completions fired immediately with zero counts.
        let completions = fx.recorder.payloads(Topic::ImageEmbeddingsCompleted);
        assert_eq!(completions.len(), 1);
        if let EventPayload::ImageEmbeddingsCompleted(c) = &completions[0] {
            assert_eq!(c.total_assets, 0);
            assert_eq!(c.processed_assets, 0);
            assert!(!c.has_partial_completion);
        }
        assert_eq!(fx.recorder.count(Topic::ImageKeypointsCompleted), 1);

        assert_eq!(fx.recorder.count(Topic::MatchResult), 0);
        assert_eq!(fx.recorder.count(Topic::EvidencesGenerationCompleted), 1);
    }

    /// S3 — partial completion at the 90% threshold: 18 of 20 assets
    /// arrive and the stage completes exactly once, flagged partial.
    #[tokio::test]
    async fn test_s3_partial_completion() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.publish(EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            total_images: 20,
            watermark_ttl: Some(300),
        }))
        .await;
        for i in 0..18 {
            fx.publish(EventPayload::ImageEmbeddingReady(
                shared_bus::payloads::AssetReady {
                    event_id: Uuid::new_v4(),
                    job_id: job_id.clone(),
                    asset_id: format!("img-{i}"),
                },
            ))
            .await;
        }

        fx.wait_for_events(Topic::ImageEmbeddingsCompleted, 1, WAIT).await;
        sleep(Duration::from_millis(100)).await;

        let completions = fx.recorder.payloads(Topic::ImageEmbeddingsCompleted);
        assert_eq!(completions.len(), 1, "emitted exactly once");
        if let EventPayload::ImageEmbeddingsCompleted(c) = &completions[0] {
            assert_eq!(c.processed_assets, 18);
            assert_eq!(c.failed_assets, 0);
            assert!(c.has_partial_completion);
        }
    }

    /// S4 — duplicate completion redelivery: three deliveries of the
    /// same completion advance the phase once.
    #[tokio::test]
    async fn test_s4_duplicate_completion_redelivery() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;
        fx.pipeline
            .stores
            .jobs
            .transition_phase(&job_id, JobPhase::Collection, JobPhase::FeatureExtraction)
            .await
            .unwrap();
        fx.pipeline
            .stores
            .jobs
            .transition_phase(&job_id, JobPhase::FeatureExtraction, JobPhase::Matching)
            .await
            .unwrap();

        let completed = EventPayload::MatchRequestCompleted(MatchRequestCompleted {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            match_count: 0,
        });
        for _ in 0..3 {
            fx.publish(completed.clone()).await;
        }
        fx.wait_for_phase(&job_id, "evidence", WAIT).await;
        sleep(Duration::from_millis(100)).await;

        let receipts = fx
            .pipeline
            .stores
            .phase_events
            .names_for_job(&job_id)
            .await
            .unwrap();
        assert_eq!(receipts, vec!["match.request.completed".to_string()]);
        assert_eq!(
            fx.pipeline.service.get_status(&job_id).await.unwrap().phase,
            "evidence"
        );
    }

    /// S5 — matcher idempotency: a republished `match.request` with the
    /// same event id produces no new results and no second completion.
    #[tokio::test]
    async fn test_s5_matcher_idempotency() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.simulate_product_collection(
            &job_id,
            &[("p1", vec![("i1", unit_embedding(8, 0)), ("i2", unit_embedding(8, 0))])],
        )
        .await;
        fx.simulate_video_collection(&job_id, "v1", &[("f3", 12.5, unit_embedding(8, 0))])
            .await;
        fx.pipeline
            .stores
            .jobs
            .transition_phase(&job_id, JobPhase::Collection, JobPhase::FeatureExtraction)
            .await
            .unwrap();
        fx.pipeline
            .stores
            .jobs
            .transition_phase(&job_id, JobPhase::FeatureExtraction, JobPhase::Matching)
            .await
            .unwrap();

        let request = EventPayload::MatchRequest(MatchRequest {
            event_id: Uuid::new_v4(),
            job_id: job_id.clone(),
            industry: "ergonomic pillows".into(),
            product_set_id: job_id.clone(),
            video_set_id: job_id.clone(),
            top_k: 20,
        });
        fx.publish(request.clone()).await;
        fx.wait_for_events(Topic::MatchRequestCompleted, 1, WAIT).await;

        fx.publish(request).await;
        sleep(Duration::from_millis(200)).await;

        assert_eq!(fx.recorder.count(Topic::MatchResult), 1);
        assert_eq!(fx.recorder.count(Topic::MatchRequestCompleted), 1);
        assert_eq!(
            fx.pipeline.stores.matches.for_job(&job_id).await.unwrap().len(),
            1
        );
    }

    /// S6 — cancellation mid-flight: a completion arriving after the
    /// cancel is recorded but never advances the phase, and no
    /// `match.request` goes out.
    #[tokio::test]
    async fn test_s6_cancellation_mid_flight() {
        let fx = TestPipeline::start().await;
        let job_id = started_job(&fx).await;

        fx.simulate_product_collection(
            &job_id,
            &[("p1", vec![("i1", unit_embedding(8, 0))])],
        )
        .await;
        fx.simulate_video_collection(&job_id, "v1", &[("f1", 1.0, unit_embedding(8, 1))])
            .await;
        fx.wait_for_phase(&job_id, "feature_extraction", WAIT).await;

        let cancelled = fx
            .pipeline
            .service
            .cancel_job(&job_id, Some("operator stop".into()), None)
            .await
            .unwrap();
        assert_eq!(cancelled.phase, "cancelled");

        // A completion emitted before the tracker observed the cancel
        // still arrives at the transition manager.
        fx.publish(EventPayload::ImageEmbeddingsCompleted(
            shared_bus::payloads::StageCompleted {
                event_id: Uuid::new_v4(),
                job_id: job_id.clone(),
                total_assets: 1,
                processed_assets: 1,
                failed_assets: 0,
                has_partial_completion: false,
                watermark_ttl: Some(300),
            },
        ))
        .await;
        sleep(Duration::from_millis(300)).await;

        // Recorded as a receipt, but the phase never moves and no
        // match.request goes out.
        let receipts = fx
            .pipeline
            .stores
            .phase_events
            .names_for_job(&job_id)
            .await
            .unwrap();
        assert!(receipts.contains(&"image.embeddings.completed".to_string()));

        let status = fx.pipeline.service.get_status(&job_id).await.unwrap();
        assert_eq!(status.phase, "cancelled");
        assert_eq!(status.percent, 0);
        assert_eq!(fx.recorder.count(Topic::MatchRequest), 0);
    }
}
