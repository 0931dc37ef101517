//! The matcher worker: bus wiring around the engine.

use crate::engine::{AcceptedMatch, MatchEngine};
use async_trait::async_trait;
use pvm_telemetry::{EVENTS_PROCESSED, MATCHES_ACCEPTED};
use shared_bus::exchange::TopicExchange;
use shared_bus::payloads::{BestPair, EventPayload, MatchRequestCompleted, MatchResult};
use shared_bus::publisher::{EventPublisher, PublishError};
use shared_bus::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use shared_bus::topics::Topic;
use shared_bus::REASON_INVALID_SCHEMA;
use shared_store::ports::{JobStore, ProcessedEventStore};
use shared_types::entities::WorkerId;
use shared_types::errors::HandlerError;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The matcher worker: one `match.request` in, zero or more
/// `match.result`s and exactly one `match.request.completed` out.
pub struct MatcherWorker {
    engine: MatchEngine,
    publisher: Arc<dyn EventPublisher>,
    ledger: Arc<dyn ProcessedEventStore>,
    jobs: Arc<dyn JobStore>,
}

impl MatcherWorker {
    #[must_use]
    pub fn new(
        engine: MatchEngine,
        publisher: Arc<dyn EventPublisher>,
        ledger: Arc<dyn ProcessedEventStore>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            engine,
            publisher,
            ledger,
            jobs,
        }
    }

    /// Binds the `match.request` queue.
    pub fn subscribe(self: Arc<Self>, bus: &TopicExchange) -> SubscriptionHandle {
        bus.subscribe(Topic::MatchRequest, WorkerId::Matcher.name(), self as _)
    }

    fn result_payload(matched: &AcceptedMatch) -> EventPayload {
        let record = &matched.record;
        EventPayload::MatchResult(MatchResult {
            event_id: Uuid::new_v4(),
            job_id: record.job_id.clone(),
            product_id: record.product_id.clone(),
            video_id: record.video_id.clone(),
            best_pair: BestPair {
                img_id: record.best_img_id.clone(),
                frame_id: record.best_frame_id.clone(),
                score_pair: matched.best_score_pair,
            },
            score: record.score,
            ts: record.ts,
        })
    }
}

#[async_trait]
impl EventHandler for MatcherWorker {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let topic = delivery.payload.topic();
        let EventPayload::MatchRequest(request) = delivery.payload else {
            warn!(%topic, "Unexpected topic for matcher");
            return Ok(());
        };

        // Cancelled/failed jobs do no matching work.
        if let Some(phase) = self.jobs.phase(&request.job_id).await? {
            if phase.is_terminal() {
                self.ledger.insert(request.event_id, &request.job_id).await?;
                debug!(job_id = %request.job_id, phase = %phase, "Job terminal, dropping match request");
                return Ok(());
            }
        }

        // The whole request is the idempotency unit: a redelivered
        // request must not re-emit results or the completion.
        if !self.ledger.insert(request.event_id, &request.job_id).await? {
            debug!(event_id = %request.event_id, "Duplicate match request, acking");
            return Ok(());
        }

        let accepted = self.engine.process(&request).await?;
        info!(
            job_id = %request.job_id,
            accepted = accepted.len(),
            "Match sweep finished"
        );

        for matched in &accepted {
            self.publisher
                .publish(Self::result_payload(matched))
                .await
                .map_err(map_publish_err)?;
            MATCHES_ACCEPTED.inc();
        }

        self.publisher
            .publish(EventPayload::MatchRequestCompleted(MatchRequestCompleted {
                event_id: Uuid::new_v4(),
                job_id: request.job_id.clone(),
                match_count: accepted.len() as u64,
            }))
            .await
            .map_err(map_publish_err)?;

        EVENTS_PROCESSED
            .with_label_values(&[Topic::MatchRequest.routing_key()])
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
