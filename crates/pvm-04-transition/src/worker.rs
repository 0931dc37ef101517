//! The transition manager worker.
//!
//! Consumes only job-level completions. Each arrival is recorded as a
//! receipt first (`UNIQUE(job_id, name)`), then the barrier is evaluated
//! in a loop: a transition can immediately satisfy the next barrier when
//! receipts arrived out of order, and a lost compare-and-set race is
//! re-evaluated against the fresh phase.

use crate::domain::{barrier_met, next_phase};
use async_trait::async_trait;
use pvm_telemetry::{EVENTS_PROCESSED, JOBS_COMPLETED, JOBS_FAILED, PHASE_TRANSITIONS};
use shared_bus::exchange::TopicExchange;
use shared_bus::payloads::{EventPayload, JobCompleted, MatchRequest};
use shared_bus::publisher::{EventPublisher, PublishError};
use shared_bus::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use shared_bus::topics::Topic;
use shared_bus::REASON_INVALID_SCHEMA;
use shared_store::ports::{CatalogStore, JobStore, PhaseEventStore, ProcessedEventStore};
use shared_types::entities::{JobPhase, WorkerId};
use shared_types::errors::HandlerError;
use std::env;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Transition manager tuning.
#[derive(Debug, Clone)]
pub struct TransitionConfig {
    /// `top_k` carried on the `match.request` dispatched when a job
    /// enters `matching`, `[1, 100]`.
    pub match_top_k: u32,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self { match_top_k: 20 }
    }
}

impl TransitionConfig {
    /// Reads `PVM_MATCH_TOP_K` (default 20, clamped to `[1, 100]`).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            match_top_k: env::var("PVM_MATCH_TOP_K")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .map(|v| v.clamp(1, 100))
                .unwrap_or(defaults.match_top_k),
        }
    }
}

/// The authoritative phase state machine.
pub struct TransitionManager {
    publisher: Arc<dyn EventPublisher>,
    jobs: Arc<dyn JobStore>,
    catalog: Arc<dyn CatalogStore>,
    phase_events: Arc<dyn PhaseEventStore>,
    ledger: Arc<dyn ProcessedEventStore>,
    config: TransitionConfig,
}

impl TransitionManager {
    #[must_use]
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        jobs: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        phase_events: Arc<dyn PhaseEventStore>,
        ledger: Arc<dyn ProcessedEventStore>,
        config: TransitionConfig,
    ) -> Self {
        Self {
            publisher,
            jobs,
            catalog,
            phase_events,
            ledger,
            config,
        }
    }

    /// Binds one queue per job-level completion topic.
    pub fn subscribe_all(self: Arc<Self>, bus: &TopicExchange) -> Vec<SubscriptionHandle> {
        Topic::JOB_LEVEL_COMPLETIONS
            .iter()
            .map(|&topic| {
                bus.subscribe(topic, WorkerId::TransitionManager.name(), Arc::clone(&self) as _)
            })
            .collect()
    }

    /// Marks a job failed after an unrecoverable fault. No further
    /// requests are published for it; artifacts stay for inspection.
    pub async fn fail_job(&self, job_id: &str, reason: &str) -> Result<(), HandlerError> {
        error!(%job_id, reason, "Marking job failed");
        self.jobs.mark_failed(job_id, reason.to_string()).await?;
        JOBS_FAILED.inc();
        Ok(())
    }

    /// Evaluates the barrier for the job's current phase, advancing as
    /// far as the recorded receipts allow.
    async fn evaluate(&self, job_id: &str) -> Result<(), HandlerError> {
        loop {
            let Some(job) = self.jobs.get(job_id).await? else {
                warn!(%job_id, "Completion for unknown job, nothing to advance");
                return Ok(());
            };
            if job.phase.is_terminal() {
                debug!(%job_id, phase = %job.phase, "Terminal phase, receipt recorded only");
                return Ok(());
            }

            let received = self.phase_events.names_for_job(job_id).await?;
            if !barrier_met(job.phase, job.asset_types, &received) {
                return Ok(());
            }
            let Some(next) = next_phase(job.phase) else {
                return Ok(());
            };

            // CAS loss means another consumer advanced the job; loop to
            // re-evaluate against the fresh phase.
            if !self.jobs.transition_phase(job_id, job.phase, next).await? {
                continue;
            }

            PHASE_TRANSITIONS.with_label_values(&[next.as_str()]).inc();
            info!(%job_id, from = %job.phase, to = %next, "Phase advanced");

            let counts = self.catalog.counts_for_job(job_id).await?;
            self.jobs.set_counts(job_id, counts).await?;

            match next {
                JobPhase::Matching => {
                    // Guarded by the CAS above: dispatched exactly once,
                    // on the transition itself, never on re-evaluation.
                    self.publisher
                        .publish(EventPayload::MatchRequest(MatchRequest {
                            event_id: Uuid::new_v4(),
                            job_id: job_id.to_string(),
                            industry: job.query.industry.clone(),
                            product_set_id: job_id.to_string(),
                            video_set_id: job_id.to_string(),
                            top_k: self.config.match_top_k,
                        }))
                        .await
                        .map_err(map_publish_err)?;
                    debug!(%job_id, "Match request dispatched");
                }
                JobPhase::Completed => {
                    JOBS_COMPLETED.inc();
                    self.publisher
                        .publish(EventPayload::JobCompleted(JobCompleted {
                            event_id: Uuid::new_v4(),
                            job_id: job_id.to_string(),
                            phase: next.as_str().to_string(),
                            counts,
                        }))
                        .await
                        .map_err(map_publish_err)?;
                    info!(%job_id, "Job completed");
                }
                _ => {}
            }
            // Receipts may already satisfy the next barrier; keep going.
        }
    }
}

#[async_trait]
impl EventHandler for TransitionManager {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let payload = delivery.payload;
        let topic = payload.topic();
        if !Topic::JOB_LEVEL_COMPLETIONS.contains(&topic) {
            warn!(%topic, "Unexpected topic for transition manager");
            return Ok(());
        }
        let event_id = payload.event_id();
        let job_id = payload.job_id().to_string();

        // Duplicate deliveries skip the receipt write but still
        // re-evaluate: evaluation is idempotent (CAS + unique receipts),
        // and a redelivery may be the only signal left after a crashed
        // first attempt.
        if self.ledger.insert(event_id, &job_id).await? {
            // Receipts are recorded even for cancelled jobs; they just
            // never advance the phase.
            let newly_recorded = self
                .phase_events
                .insert(&job_id, topic.routing_key(), event_id)
                .await?;
            if !newly_recorded {
                debug!(%job_id, %topic, "Completion already on record");
            }
        } else {
            debug!(%event_id, %topic, "Duplicate completion delivery, re-evaluating only");
        }

        let result = self.evaluate(&job_id).await;
        if let Err(err @ HandlerError::Fatal { .. }) = &result {
            // Unrecoverable while advancing this job: stop it.
            self.fail_job(&job_id, &err.to_string()).await?;
            return result;
        }
        result?;

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
