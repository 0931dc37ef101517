//! The evidence coordinator worker.

use crate::builder::EvidenceBuilder;
use async_trait::async_trait;
use parking_lot::Mutex;
use pvm_telemetry::EVENTS_PROCESSED;
use shared_bus::exchange::TopicExchange;
use shared_bus::payloads::{EventPayload, JobCompletion};
use shared_bus::publisher::{EventPublisher, PublishError};
use shared_bus::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use shared_bus::topics::Topic;
use shared_bus::REASON_INVALID_SCHEMA;
use shared_store::ports::{JobStore, MatchStore, ProcessedEventStore};
use shared_types::entities::WorkerId;
use shared_types::errors::HandlerError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-job evidence progress. `expected` is unknown until the matcher's
/// completion event announces the pair count.
#[derive(Debug, Default)]
struct EvidenceProgress {
    expected: Option<u64>,
    done: u64,
    completed_emitted: bool,
}

impl EvidenceProgress {
    /// Claims the completion when every announced pair is processed.
    /// Returns `true` exactly once per job.
    fn try_claim(&mut self) -> bool {
        if self.completed_emitted {
            return false;
        }
        match self.expected {
            Some(expected) if self.done >= expected => {
                self.completed_emitted = true;
                true
            }
            _ => false,
        }
    }
}

/// The evidence coordinator.
pub struct EvidenceCoordinator {
    publisher: Arc<dyn EventPublisher>,
    ledger: Arc<dyn ProcessedEventStore>,
    jobs: Arc<dyn JobStore>,
    matches: Arc<dyn MatchStore>,
    builder: EvidenceBuilder,
    // Per-job rows behind per-key async mutexes, the same serialization
    // discipline the progress store uses.
    state: Mutex<HashMap<String, Arc<tokio::sync::Mutex<EvidenceProgress>>>>,
}

impl EvidenceCoordinator {
    /// Topics this worker consumes.
    pub const TOPICS: [Topic; 2] = [Topic::MatchResult, Topic::MatchRequestCompleted];

    #[must_use]
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        ledger: Arc<dyn ProcessedEventStore>,
        jobs: Arc<dyn JobStore>,
        matches: Arc<dyn MatchStore>,
        builder: EvidenceBuilder,
    ) -> Self {
        Self {
            publisher,
            ledger,
            jobs,
            matches,
            builder,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Binds one queue per consumed topic.
    pub fn subscribe_all(self: Arc<Self>, bus: &TopicExchange) -> Vec<SubscriptionHandle> {
        Self::TOPICS
            .iter()
            .map(|&topic| {
                bus.subscribe(topic, WorkerId::EvidenceBuilder.name(), Arc::clone(&self) as _)
            })
            .collect()
    }

    fn row(&self, job_id: &str) -> Arc<tokio::sync::Mutex<EvidenceProgress>> {
        Arc::clone(
            self.state
                .lock()
                .entry(job_id.to_string())
                .or_default(),
        )
    }

    async fn maybe_complete(
        &self,
        job_id: &str,
        mutate: impl FnOnce(&mut EvidenceProgress),
    ) -> Result<(), HandlerError> {
        let row = self.row(job_id);
        let claimed = {
            let mut guard = row.lock().await;
            mutate(&mut guard);
            guard.try_claim()
        };
        if !claimed {
            return Ok(());
        }

        info!(%job_id, "All evidence generated, emitting completion");
        self.publisher
            .publish(EventPayload::EvidencesGenerationCompleted(JobCompletion {
                event_id: Uuid::new_v4(),
                job_id: job_id.to_string(),
            }))
            .await
            .map(|_| ())
            .map_err(map_publish_err)
    }
}

#[async_trait]
impl EventHandler for EvidenceCoordinator {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let payload = delivery.payload;
        let topic = payload.topic();
        let event_id = payload.event_id();
        let job_id = payload.job_id().to_string();

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

        match payload {
            EventPayload::MatchResult(result) => {
                let path = self
                    .builder
                    .write_artifact(&result)
                    .map_err(HandlerError::retriable)?;
                self.matches
                    .set_evidence_path(&job_id, &result.product_id, &result.video_id, path)
                    .await?;
                debug!(
                    %job_id,
                    product_id = %result.product_id,
                    video_id = %result.video_id,
                    "Evidence artifact written"
                );
                self.maybe_complete(&job_id, |row| row.done += 1).await?;
            }
            EventPayload::MatchRequestCompleted(completed) => {
                if completed.match_count == 0 {
                    debug!(%job_id, "Zero matches announced, fast-path completion");
                }
                self.maybe_complete(&job_id, |row| {
                    row.expected = Some(completed.match_count);
                })
                .await?;
            }
            other => {
                warn!(topic = %other.topic(), "Unexpected topic for evidence coordinator");
                return Ok(());
            }
        }

        EVENTS_PROCESSED
            .with_label_values(&[topic.routing_key()])
            .inc();
        Ok(())
    }
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
    use chrono::Utc;
    use shared_bus::exchange::ExchangeConfig;
    use shared_bus::payloads::{BestPair, MatchRequestCompleted, MatchResult};
    use shared_store::blobs::BlobRoot;
    use shared_store::memory::MemoryStores;
    use shared_types::entities::{MatchRecord, MatchStatus};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::sleep;

    struct Recorder {
        seen: Mutex<Vec<EventPayload>>,
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
        recorder: Arc<Recorder>,
        _dir: TempDir,
        _subs: Vec<SubscriptionHandle>,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(TopicExchange::with_config(ExchangeConfig {
            backoff_base: Duration::from_millis(5),
            ..ExchangeConfig::default()
        }));
        let stores = MemoryStores::new();
        let dir = TempDir::new().unwrap();
        let builder = EvidenceBuilder::new(BlobRoot::create(dir.path()).unwrap());

        let coordinator = Arc::new(EvidenceCoordinator::new(
            bus.clone() as Arc<dyn EventPublisher>,
            stores.ledger.clone(),
            stores.jobs.clone(),
            stores.matches.clone(),
            builder,
        ));
        let mut subs = coordinator.clone().subscribe_all(&bus);

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        subs.push(bus.subscribe(
            Topic::EvidencesGenerationCompleted,
            "recorder",
            recorder.clone() as _,
        ));

        Fixture {
            bus,
            stores,
            recorder,
            _dir: dir,
            _subs: subs,
        }
    }

    fn completed(job_id: &str, match_count: u64) -> EventPayload {
        EventPayload::MatchRequestCompleted(MatchRequestCompleted {
            event_id: Uuid::new_v4(),
            job_id: job_id.into(),
            match_count,
        })
    }

    fn result(job_id: &str, product: &str, video: &str) -> EventPayload {
        EventPayload::MatchResult(MatchResult {
            event_id: Uuid::new_v4(),
            job_id: job_id.into(),
            product_id: product.into(),
            video_id: video.into(),
            best_pair: BestPair {
                img_id: "i1".into(),
                frame_id: "f3".into(),
                score_pair: 0.95,
            },
            score: 0.91,
            ts: 12.5,
        })
    }

    async fn seed_match(stores: &MemoryStores, job: &str, product: &str, video: &str) {
        stores
            .matches
            .upsert(MatchRecord {
                match_id: Uuid::new_v4(),
                job_id: job.into(),
                product_id: product.into(),
                video_id: video.into(),
                best_img_id: "i1".into(),
                best_frame_id: "f3".into(),
                ts: 12.5,
                score: 0.91,
                status: MatchStatus::Accepted,
                evidence_path: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn completion_count(recorder: &Recorder) -> usize {
        recorder
            .seen
            .lock()
            .iter()
            .filter(|p| p.topic() == Topic::EvidencesGenerationCompleted)
            .count()
    }

    #[tokio::test]
    async fn test_zero_match_fast_path() {
        let fx = fixture().await;
        fx.bus.publish(completed("job-1", 0)).await.unwrap();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(completion_count(&fx.recorder), 1);
    }

    #[tokio::test]
    async fn test_results_then_completion() {
        let fx = fixture().await;
        seed_match(&fx.stores, "job-1", "p1", "v1").await;

        fx.bus.publish(result("job-1", "p1", "v1")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(completion_count(&fx.recorder), 0);

        fx.bus.publish(completed("job-1", 1)).await.unwrap();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(completion_count(&fx.recorder), 1);

        // Evidence path recorded on the match row.
        let row = fx
            .stores
            .matches
            .get("job-1", "p1", "v1")
            .await
            .unwrap()
            .unwrap();
        assert!(row.evidence_path.is_some());
    }

    #[tokio::test]
    async fn test_completion_then_results() {
        let fx = fixture().await;
        seed_match(&fx.stores, "job-1", "p1", "v1").await;

        // No ordering guarantee: the count may arrive first.
        fx.bus.publish(completed("job-1", 1)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(completion_count(&fx.recorder), 0);

        fx.bus.publish(result("job-1", "p1", "v1")).await.unwrap();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(completion_count(&fx.recorder), 1);
    }

    #[tokio::test]
    async fn test_duplicate_completion_emits_once() {
        let fx = fixture().await;
        let event = completed("job-1", 0);
        fx.bus.publish(event.clone()).await.unwrap();
        fx.bus.publish(event).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(completion_count(&fx.recorder), 1);
    }
}
