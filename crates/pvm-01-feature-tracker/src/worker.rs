//! The tracker worker: bus wiring around the aggregation domain.

use crate::config::TrackerConfig;
use crate::domain::{
    apply_batch, apply_ready, claim_completion, claim_watermark_completion, completion_payload,
    stage_for_batch, stage_for_ready, zero_masked_forward, BatchOutcome, CompletionSummary,
};
use async_trait::async_trait;
use chrono::Utc;
use pvm_telemetry::{COMPLETIONS_EMITTED, EVENTS_PROCESSED};
use shared_bus::exchange::TopicExchange;
use shared_bus::payloads::EventPayload;
use shared_bus::publisher::{EventPublisher, PublishError};
use shared_bus::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use shared_bus::topics::Topic;
use shared_bus::REASON_INVALID_SCHEMA;
use shared_store::ports::{JobStore, ProcessedEventStore, ProgressStore};
use shared_types::entities::{Stage, WorkerId};
use shared_types::errors::HandlerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The completion aggregator worker.
pub struct FeatureTracker {
    publisher: Arc<dyn EventPublisher>,
    progress: Arc<dyn ProgressStore>,
    ledger: Arc<dyn ProcessedEventStore>,
    jobs: Arc<dyn JobStore>,
    config: TrackerConfig,
}

impl FeatureTracker {
    /// Topics this worker consumes.
    pub const TOPICS: [Topic; 10] = [
        Topic::ProductsImagesReadyBatch,
        Topic::VideosKeyframesReadyBatch,
        Topic::ProductsImagesMaskedBatch,
        Topic::VideoKeyframesMaskedBatch,
        Topic::ProductsImageReady,
        Topic::VideosKeyframesReady,
        Topic::ImageEmbeddingReady,
        Topic::ImageKeypointReady,
        Topic::VideoEmbeddingReady,
        Topic::VideoKeypointReady,
    ];

    #[must_use]
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        progress: Arc<dyn ProgressStore>,
        ledger: Arc<dyn ProcessedEventStore>,
        jobs: Arc<dyn JobStore>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            publisher,
            progress,
            ledger,
            jobs,
            config,
        }
    }

    /// Binds one queue per consumed topic.
    pub fn subscribe_all(self: Arc<Self>, bus: &TopicExchange) -> Vec<SubscriptionHandle> {
        Self::TOPICS
            .iter()
            .map(|&topic| {
                bus.subscribe(topic, WorkerId::FeatureTracker.name(), Arc::clone(&self) as _)
            })
            .collect()
    }

    /// Emits partial completions for every row whose watermark lapsed.
    pub async fn sweep_watermarks(&self) -> Result<(), HandlerError> {
        let due = self.progress.expired(Utc::now()).await?;
        for row in due {
            let mut claimed: Option<CompletionSummary> = None;
            self.progress
                .update(&row.job_id, row.stage, &mut |p| {
                    claimed = claim_watermark_completion(p);
                })
                .await?;
            let Some(summary) = claimed else { continue };
            // Segmentation input stages track counters only; nothing to
            // emit when their watermark lapses.
            let Some(payload) = completion_payload(
                row.stage,
                &row.job_id,
                &summary,
                self.config.default_watermark_ttl_secs,
            ) else {
                continue;
            };
            info!(
                job_id = %row.job_id,
                stage = %row.stage,
                processed = summary.processed_assets,
                expected = summary.total_assets,
                "Watermark lapsed, emitting partial completion"
            );
            self.emit(row.stage, &summary, payload).await?;
        }
        Ok(())
    }

    async fn emit(
        &self,
        stage: Stage,
        summary: &CompletionSummary,
        payload: EventPayload,
    ) -> Result<(), HandlerError> {
        COMPLETIONS_EMITTED
            .with_label_values(&[
                stage.as_str(),
                if summary.has_partial_completion {
                    "true"
                } else {
                    "false"
                },
            ])
            .inc();
        self.publisher
            .publish(payload)
            .await
            .map(|_| ())
            .map_err(map_publish_err)
    }

    async fn handle_batch(
        &self,
        topic: Topic,
        job_id: &str,
        total: u64,
        watermark_ttl: Option<u64>,
    ) -> Result<Vec<(Stage, CompletionSummary, EventPayload)>, HandlerError> {
        let ttl_secs = watermark_ttl.unwrap_or(self.config.default_watermark_ttl_secs);
        let expires = Utc::now() + chrono::Duration::seconds(ttl_secs as i64);
        let threshold = self.config.threshold();

        let mut emissions = Vec::new();
        for &stage in stage_for_batch(topic) {
            let mut outcome: Option<BatchOutcome> = None;
            let mut claimed: Option<CompletionSummary> = None;
            self.progress
                .update(job_id, stage, &mut |row| {
                    let batch_outcome = apply_batch(row, total, expires);
                    if !matches!(batch_outcome, BatchOutcome::IgnoredAlreadyCompleted) {
                        claimed = claim_completion(row, threshold);
                    }
                    outcome = Some(batch_outcome);
                })
                .await?;

            match outcome {
                Some(BatchOutcome::Superseded { previous, current }) => warn!(
                    %job_id, stage = %stage, previous, current,
                    "Duplicate batch for stage; later total wins"
                ),
                Some(BatchOutcome::IgnoredAlreadyCompleted) => warn!(
                    %job_id, stage = %stage, total,
                    "Batch arrived after completion was emitted; ignoring"
                ),
                _ => {}
            }

            if let Some(summary) = claimed {
                if let Some(payload) = completion_payload(stage, job_id, &summary, ttl_secs) {
                    emissions.push((stage, summary, payload));
                }
            }
        }
        Ok(emissions)
    }

    async fn handle_ready(
        &self,
        stage: Stage,
        job_id: &str,
        count: u64,
    ) -> Result<Option<(Stage, CompletionSummary, EventPayload)>, HandlerError> {
        let threshold = self.config.threshold();
        let mut claimed: Option<CompletionSummary> = None;
        self.progress
            .update(job_id, stage, &mut |row| {
                apply_ready(row, count);
                claimed = claim_completion(row, threshold);
            })
            .await?;

        let Some(summary) = claimed else {
            return Ok(None);
        };
        Ok(completion_payload(
            stage,
            job_id,
            &summary,
            self.config.default_watermark_ttl_secs,
        )
        .map(|payload| (stage, summary, payload)))
    }
}

#[async_trait]
impl EventHandler for FeatureTracker {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let payload = delivery.payload;
        let topic = payload.topic();
        let event_id = payload.event_id();
        let job_id = payload.job_id().to_string();

        // Cancelled/failed jobs take no further work; the event is
        // recorded so a redelivery stays silent.
        if let Some(phase) = self.jobs.phase(&job_id).await? {
            if phase.is_terminal() {
                self.ledger.insert(event_id, &job_id).await?;
                debug!(%job_id, %topic, phase = %phase, "Job terminal, discarding event");
                return Ok(());
            }
        }

        if !self.ledger.insert(event_id, &job_id).await? {
            debug!(%event_id, %topic, "Duplicate event, acking");
            return Ok(());
        }

        let mut emissions: Vec<(Stage, CompletionSummary, EventPayload)> = Vec::new();
        let mut forward: Option<EventPayload> = None;

        match &payload {
            EventPayload::ProductsImagesReadyBatch(batch)
            | EventPayload::ProductsImagesMaskedBatch(batch) => {
                emissions = self
                    .handle_batch(topic, &job_id, batch.total_images, batch.watermark_ttl)
                    .await?;
                if batch.total_images == 0 {
                    forward = zero_masked_forward(topic, &job_id, batch.watermark_ttl);
                }
            }
            EventPayload::VideosKeyframesReadyBatch(batch)
            | EventPayload::VideoKeyframesMaskedBatch(batch) => {
                emissions = self
                    .handle_batch(topic, &job_id, batch.total_keyframes, batch.watermark_ttl)
                    .await?;
                if batch.total_keyframes == 0 {
                    forward = zero_masked_forward(topic, &job_id, batch.watermark_ttl);
                }
            }
            EventPayload::VideosKeyframesReady(ready) => {
                if let Some(stage) = stage_for_ready(topic) {
                    emissions = self
                        .handle_ready(stage, &job_id, ready.frames.len() as u64)
                        .await?
                        .into_iter()
                        .collect();
                }
            }
            _ => {
                let Some(stage) = stage_for_ready(topic) else {
                    warn!(%topic, "Unexpected topic for feature tracker");
                    return Ok(());
                };
                emissions = self.handle_ready(stage, &job_id, 1).await?.into_iter().collect();
            }
        }

        if let Some(payload) = forward {
            debug!(%job_id, "Zero-asset batch, forwarding empty masked batch");
            self.publisher
                .publish(payload)
                .await
                .map_err(map_publish_err)?;
        }

        for (stage, summary, payload) in emissions {
            info!(
                %job_id,
                stage = %stage,
                processed = summary.processed_assets,
                expected = summary.total_assets,
                partial = summary.has_partial_completion,
                "Stage completed"
            );
            self.emit(stage, &summary, payload).await?;
        }

        EVENTS_PROCESSED
            .with_label_values(&[topic.routing_key()])
            .inc();
        Ok(())
    }
}

/// Starts the periodic watermark sweeper.
pub fn spawn_watermark_sweeper(
    tracker: Arc<FeatureTracker>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(err) = tracker.sweep_watermarks().await {
                warn!(error = %err, "Watermark sweep failed");
            }
        }
    })
}

fn map_publish_err(err: PublishError) -> HandlerError {
    match err {
        PublishError::Schema(e) => HandlerError::fatal(REASON_INVALID_SCHEMA, e),
        PublishError::Timeout { topic } => {
            HandlerError::retriable(format!("publish to {topic} timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared_bus::exchange::ExchangeConfig;
    use shared_bus::payloads::{AssetReady, ProductImagesBatch};
    use shared_store::memory::MemoryStores;
    use tokio::time::sleep;
    use uuid::Uuid;

    /// Records every delivery it sees.
    struct Recorder {
        seen: Mutex<Vec<EventPayload>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn topics(&self) -> Vec<Topic> {
            self.seen.lock().iter().map(EventPayload::topic).collect()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
            self.seen.lock().push(delivery.payload);
            Ok(())
        }
    }

    struct Fixture {
        bus: Arc<TopicExchange>,
        stores: MemoryStores,
        tracker: Arc<FeatureTracker>,
        recorder: Arc<Recorder>,
        _subs: Vec<SubscriptionHandle>,
    }

    fn fixture(config: TrackerConfig) -> Fixture {
        let bus = Arc::new(TopicExchange::with_config(ExchangeConfig {
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(20),
            ..ExchangeConfig::default()
        }));
        let stores = MemoryStores::new();
        let tracker = Arc::new(FeatureTracker::new(
            bus.clone() as Arc<dyn EventPublisher>,
            stores.progress.clone(),
            stores.ledger.clone(),
            stores.jobs.clone(),
            config,
        ));
        let mut subs = tracker.clone().subscribe_all(&bus);

        let recorder = Recorder::new();
        for topic in [
            Topic::ImageEmbeddingsCompleted,
            Topic::ImageKeypointsCompleted,
            Topic::VideoEmbeddingsCompleted,
            Topic::VideoKeypointsCompleted,
            Topic::ProductsImagesMaskedBatch,
            Topic::VideoKeyframesMaskedBatch,
        ] {
            subs.push(bus.subscribe(topic, "recorder", recorder.clone()));
        }
        Fixture {
            bus,
            stores,
            tracker,
            recorder,
            _subs: subs,
        }
    }

    fn masked_batch(job_id: &str, total: u64) -> EventPayload {
        EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.into(),
            total_images: total,
            watermark_ttl: None,
        })
    }

    fn embedding_ready(job_id: &str, asset: &str) -> EventPayload {
        EventPayload::ImageEmbeddingReady(AssetReady {
            event_id: Uuid::new_v4(),
            job_id: job_id.into(),
            asset_id: asset.into(),
        })
    }

    #[tokio::test]
    async fn test_zero_ready_batch_completes_feature_stages() {
        let fx = fixture(TrackerConfig::default());
        // Zero products collected: ready batch forwards a zero masked
        // batch, which in turn completes both image feature stages.
        let batch = EventPayload::ProductsImagesReadyBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: "job-z".into(),
            total_images: 0,
            watermark_ttl: None,
        });
        fx.bus.publish(batch).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let topics = fx.recorder.topics();
        assert!(topics.contains(&Topic::ProductsImagesMaskedBatch));
        assert!(topics.contains(&Topic::ImageEmbeddingsCompleted));
        assert!(topics.contains(&Topic::ImageKeypointsCompleted));

        // Zero counts, not partial.
        let seen = fx.recorder.seen.lock();
        let completed = seen
            .iter()
            .find_map(|p| match p {
                EventPayload::ImageEmbeddingsCompleted(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed.total_assets, 0);
        assert_eq!(completed.processed_assets, 0);
        assert!(!completed.has_partial_completion);
    }

    #[tokio::test]
    async fn test_threshold_completion_fires_once() {
        let fx = fixture(TrackerConfig::default());
        fx.bus.publish(masked_batch("job-1", 20)).await.unwrap();
        for i in 0..18 {
            fx.bus
                .publish(embedding_ready("job-1", &format!("img-{i}")))
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(150)).await;

        let seen = fx.recorder.seen.lock();
        let completions: Vec<_> = seen
            .iter()
            .filter_map(|p| match p {
                EventPayload::ImageEmbeddingsCompleted(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].processed_assets, 18);
        assert_eq!(completions[0].total_assets, 20);
        assert!(completions[0].has_partial_completion);
    }

    #[tokio::test]
    async fn test_duplicate_ready_event_counted_once() {
        let fx = fixture(TrackerConfig::default());
        fx.bus.publish(masked_batch("job-1", 5)).await.unwrap();

        let ready = embedding_ready("job-1", "img-0");
        fx.bus.publish(ready.clone()).await.unwrap();
        fx.bus.publish(ready).await.unwrap(); // same event_id redelivered
        sleep(Duration::from_millis(80)).await;

        let row = fx
            .stores
            .progress
            .get("job-1", Stage::ImageEmbeddings)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.done, 1);
    }

    #[tokio::test]
    async fn test_watermark_sweep_emits_partial() {
        // Threshold 100 so 18/20 cannot complete via counting.
        let config = TrackerConfig {
            completion_threshold_pct: 100,
            default_watermark_ttl_secs: 0,
            ..TrackerConfig::default()
        };
        let fx = fixture(config);
        fx.bus.publish(masked_batch("job-1", 20)).await.unwrap();
        for i in 0..18 {
            fx.bus
                .publish(embedding_ready("job-1", &format!("img-{i}")))
                .await
                .unwrap();
        }
        sleep(Duration::from_millis(120)).await;

        // TTL 0: the watermark is already lapsed.
        fx.tracker.sweep_watermarks().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let seen = fx.recorder.seen.lock();
        let completions: Vec<_> = seen
            .iter()
            .filter_map(|p| match p {
                EventPayload::ImageEmbeddingsCompleted(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(completions.len(), 1);
        assert!(completions[0].has_partial_completion);
        assert_eq!(completions[0].processed_assets, 18);

        // A second sweep stays silent.
        drop(seen);
        fx.tracker.sweep_watermarks().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        let seen = fx.recorder.seen.lock();
        assert_eq!(
            seen.iter()
                .filter(|p| p.topic() == Topic::ImageEmbeddingsCompleted)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_terminal_job_events_discarded() {
        let fx = fixture(TrackerConfig::default());
        let job = shared_types::entities::Job::new(
            shared_types::entities::JobQuery {
                industry: "pillows".into(),
                top_amz: 1,
                top_ebay: 1,
                queries: Default::default(),
                platforms: vec![shared_types::entities::Platform::Youtube],
                recency_days: 30,
            },
            Default::default(),
        );
        let job_id = job.job_id.clone();
        fx.stores.jobs.create(job).await.unwrap();
        fx.stores
            .jobs
            .mark_cancelled(&job_id, Some("test".into()), None)
            .await
            .unwrap();

        fx.bus.publish(masked_batch(&job_id, 0)).await.unwrap();
        sleep(Duration::from_millis(80)).await;

        // No completions for a cancelled job (the recorder still sees the
        // masked batch itself, which is fine).
        let topics = fx.recorder.topics();
        assert!(!topics.contains(&Topic::ImageEmbeddingsCompleted));
        assert!(!topics.contains(&Topic::ImageKeypointsCompleted));
    }
}
