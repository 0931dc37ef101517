//! Job service operations: start, status, cancel, delete.
//!
//! Transport-neutral: the HTTP layer binds these; the core only defines
//! the semantics.

use chrono::{DateTime, Utc};
use shared_bus::payloads::{EventPayload, ProductsCollectRequest, VideosSearchRequest};
use shared_bus::publisher::EventPublisher;
use shared_store::ports::{
    CatalogStore, JobStore, MatchStore, PhaseEventStore, ProcessedEventStore, ProgressStore,
};
use shared_types::entities::{AssetTypes, Job, JobCounts, JobQuery, Platform};
use shared_types::errors::{JobServiceError, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Inputs accepted by [`JobService::start_job`]. Optional fields take the
/// service defaults.
#[derive(Debug, Clone, Default)]
pub struct StartJobRequest {
    pub industry: String,
    pub top_amz: Option<u32>,
    pub top_ebay: Option<u32>,
    pub queries: Option<HashMap<String, Vec<String>>>,
    pub platforms: Option<Vec<Platform>>,
    pub recency_days: Option<u32>,
}

/// `StartJob` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub job_id: String,
    pub status: &'static str,
}

/// `GetStatus` response. Unknown jobs answer `phase = "unknown"` with
/// zeroed counts — never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_id: String,
    pub phase: String,
    pub percent: u8,
    pub counts: JobCounts,
    pub updated_at: Option<DateTime<Utc>>,
}

/// `CancelJob` response.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub job_id: String,
    pub phase: &'static str,
    pub cancelled_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// `DeleteJob` response.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub job_id: String,
    pub status: &'static str,
    pub deleted_at: DateTime<Utc>,
}

/// The job service.
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    catalog: Arc<dyn CatalogStore>,
    matches: Arc<dyn MatchStore>,
    phase_events: Arc<dyn PhaseEventStore>,
    ledger: Arc<dyn ProcessedEventStore>,
    progress: Arc<dyn ProgressStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl JobService {
    const DEFAULT_TOP: u32 = 10;
    const DEFAULT_RECENCY_DAYS: u32 = 365;

    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        matches: Arc<dyn MatchStore>,
        phase_events: Arc<dyn PhaseEventStore>,
        ledger: Arc<dyn ProcessedEventStore>,
        progress: Arc<dyn ProgressStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            jobs,
            catalog,
            matches,
            phase_events,
            ledger,
            progress,
            publisher,
        }
    }

    /// Creates the job in `collection` and publishes the collection
    /// requests for the sides it targets.
    ///
    /// A side is skipped only when explicitly zeroed out: both top
    /// counts 0 disable products, an empty platform list disables
    /// videos.
    pub async fn start_job(
        &self,
        request: StartJobRequest,
    ) -> Result<StartOutcome, JobServiceError> {
        let top_amz = request.top_amz.unwrap_or(Self::DEFAULT_TOP).min(100);
        let top_ebay = request.top_ebay.unwrap_or(Self::DEFAULT_TOP).min(100);
        let platforms = request.platforms.unwrap_or_else(|| vec![Platform::Youtube]);
        let recency_days = request
            .recency_days
            .unwrap_or(Self::DEFAULT_RECENCY_DAYS)
            .clamp(1, 365);
        let queries = request.queries.unwrap_or_else(|| {
            let mut map = HashMap::new();
            map.insert("en".to_string(), vec![request.industry.clone()]);
            map
        });

        let asset_types = AssetTypes {
            products: top_amz > 0 || top_ebay > 0,
            videos: !platforms.is_empty(),
        };

        let job = Job::new(
            JobQuery {
                industry: request.industry.clone(),
                top_amz,
                top_ebay,
                queries: queries.clone(),
                platforms: platforms.clone(),
                recency_days,
            },
            asset_types,
        );
        let job_id = job.job_id.clone();
        self.jobs.create(job).await?;

        if asset_types.products {
            self.publisher
                .publish(EventPayload::ProductsCollectRequest(ProductsCollectRequest {
                    event_id: Uuid::new_v4(),
                    job_id: job_id.clone(),
                    queries: queries.clone(),
                    // The wire contract wants [1, 100] on both; a side
                    // that is active but has one marketplace zeroed
                    // still collects at least one listing there.
                    top_amz: top_amz.max(1),
                    top_ebay: top_ebay.max(1),
                }))
                .await
                .map_err(|e| JobServiceError::Publish(e.to_string()))?;
        }
        if asset_types.videos {
            self.publisher
                .publish(EventPayload::VideosSearchRequest(VideosSearchRequest {
                    event_id: Uuid::new_v4(),
                    job_id: job_id.clone(),
                    industry: request.industry,
                    queries,
                    platforms,
                    recency_days,
                }))
                .await
                .map_err(|e| JobServiceError::Publish(e.to_string()))?;
        }

        info!(%job_id, products = asset_types.products, videos = asset_types.videos, "Job started");
        Ok(StartOutcome {
            job_id,
            status: "started",
        })
    }

    /// Status for any job id; unknown ids answer `phase = "unknown"`.
    pub async fn get_status(&self, job_id: &str) -> Result<JobStatus, JobServiceError> {
        let Some(job) = self.jobs.get(job_id).await? else {
            return Ok(JobStatus {
                job_id: job_id.to_string(),
                phase: "unknown".to_string(),
                percent: 0,
                counts: JobCounts::default(),
                updated_at: None,
            });
        };
        let counts = self.catalog.counts_for_job(job_id).await?;
        Ok(JobStatus {
            job_id: job.job_id,
            phase: job.phase.as_str().to_string(),
            percent: job.phase.percent(),
            counts,
            updated_at: Some(job.updated_at),
        })
    }

    /// Idempotent cancellation. Later completions for the job are
    /// recorded by the transition manager but never advance the phase.
    pub async fn cancel_job(
        &self,
        job_id: &str,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<CancelOutcome, JobServiceError> {
        let Some(job) = self.jobs.mark_cancelled(job_id, reason, notes).await? else {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            }
            .into());
        };
        info!(%job_id, "Job cancelled");
        Ok(CancelOutcome {
            job_id: job.job_id,
            phase: "cancelled",
            cancelled_at: job.cancelled_at.unwrap_or_else(Utc::now),
            reason: job.cancellation_reason,
            notes: job.cancellation_notes,
        })
    }

    /// Deletes the job and everything scoped to it. Refuses active jobs
    /// unless `force`, which cancels first.
    pub async fn delete_job(
        &self,
        job_id: &str,
        force: bool,
    ) -> Result<DeleteOutcome, JobServiceError> {
        let Some(job) = self.jobs.get(job_id).await? else {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            }
            .into());
        };

        if !job.phase.is_terminal() {
            if !force {
                return Err(JobServiceError::ActiveJob {
                    job_id: job_id.to_string(),
                    phase: job.phase.as_str().to_string(),
                });
            }
            warn!(%job_id, phase = %job.phase, "Force delete of an active job, cancelling first");
            self.jobs
                .mark_cancelled(job_id, Some("force delete".to_string()), None)
                .await?;
        }

        // Cascade in leaf-first order, job row last.
        self.matches.delete_job(job_id).await?;
        self.catalog.delete_job(job_id).await?;
        self.progress.delete_job(job_id).await?;
        self.phase_events.delete_job(job_id).await?;
        self.ledger.delete_job(job_id).await?;
        self.jobs.delete(job_id).await?;

        info!(%job_id, "Job deleted");
        Ok(DeleteOutcome {
            job_id: job_id.to_string(),
            status: "deleted",
            deleted_at: Utc::now(),
        })
    }
}
