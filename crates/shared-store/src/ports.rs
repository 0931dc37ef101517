//! # Storage Ports
//!
//! The outbound interfaces workers depend on. Adapters live in
//! [`crate::memory`] and [`crate::rocks`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::entities::{
    Embedding, Job, JobCounts, JobPhase, JobProgress, MatchRecord, Product, ProductImage, Stage,
    Video, VideoFrame,
};
use shared_types::errors::StoreError;
use uuid::Uuid;

/// Mutator applied to a progress row under its key lock. Must not block.
pub type ProgressMutator<'a> = &'a mut (dyn FnMut(&mut JobProgress) + Send);

/// Authoritative job rows. Mutated only by the transition manager.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job.
    ///
    /// # Errors
    ///
    /// `Conflict` when the job id already exists.
    async fn create(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Cheap phase read used at cancellation checkpoints.
    async fn phase(&self, job_id: &str) -> Result<Option<JobPhase>, StoreError>;

    /// Compare-and-set phase advance. Applies only when the current phase
    /// equals `from`; returns whether the transition happened.
    async fn transition_phase(
        &self,
        job_id: &str,
        from: JobPhase,
        to: JobPhase,
    ) -> Result<bool, StoreError>;

    /// Idempotent cancellation. First call stamps `cancelled_at` and the
    /// metadata; later calls return the stored row unchanged.
    async fn mark_cancelled(
        &self,
        job_id: &str,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<Job>, StoreError>;

    /// Terminal failure; artifacts are retained for inspection.
    async fn mark_failed(&self, job_id: &str, reason: String) -> Result<(), StoreError>;

    /// Refreshes the cached asset counters and `updated_at`.
    async fn set_counts(&self, job_id: &str, counts: JobCounts) -> Result<(), StoreError>;

    /// Removes the job row. Returns whether it existed.
    async fn delete(&self, job_id: &str) -> Result<bool, StoreError>;
}

/// Collected products, videos, and their per-asset feature columns.
/// Collectors write rows once; feature workers fill the nullable columns;
/// the matcher reads.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert_product(&self, product: Product) -> Result<(), StoreError>;
    async fn upsert_product_image(&self, image: ProductImage) -> Result<(), StoreError>;
    async fn upsert_video(&self, video: Video) -> Result<(), StoreError>;
    async fn upsert_video_frame(&self, frame: VideoFrame) -> Result<(), StoreError>;

    async fn products_for_job(&self, job_id: &str) -> Result<Vec<Product>, StoreError>;
    async fn product_images_for_job(&self, job_id: &str) -> Result<Vec<ProductImage>, StoreError>;
    async fn videos_for_job(&self, job_id: &str) -> Result<Vec<Video>, StoreError>;
    async fn video_frames_for_job(&self, job_id: &str) -> Result<Vec<VideoFrame>, StoreError>;

    /// Records the segmentation output path for a product image.
    async fn set_image_mask(&self, image_id: &str, mask_path: String) -> Result<(), StoreError>;
    /// Records the deep-embedding channels for a product image.
    async fn set_image_embeddings(
        &self,
        image_id: &str,
        emb_rgb: Option<Embedding>,
        emb_gray: Option<Embedding>,
    ) -> Result<(), StoreError>;
    /// Records the keypoint blob path for a product image.
    async fn set_image_keypoints(&self, image_id: &str, kp_blob_path: String)
        -> Result<(), StoreError>;

    async fn set_frame_mask(&self, frame_id: &str, mask_path: String) -> Result<(), StoreError>;
    async fn set_frame_embeddings(
        &self,
        frame_id: &str,
        emb_rgb: Option<Embedding>,
        emb_gray: Option<Embedding>,
    ) -> Result<(), StoreError>;
    async fn set_frame_keypoints(&self, frame_id: &str, kp_blob_path: String)
        -> Result<(), StoreError>;

    /// Live asset counters for status responses.
    async fn counts_for_job(&self, job_id: &str) -> Result<JobCounts, StoreError>;

    /// Cascade-deletes every catalog row of the job.
    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;
}

/// Per-`(job_id, stage)` aggregation counters with serialized mutation.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Atomically mutates the row, creating the initial row when absent.
    /// All mutations for one key are serialized; the returned row is the
    /// state after `f` ran.
    async fn update(
        &self,
        job_id: &str,
        stage: Stage,
        f: ProgressMutator<'_>,
    ) -> Result<JobProgress, StoreError>;

    async fn get(&self, job_id: &str, stage: Stage) -> Result<Option<JobProgress>, StoreError>;

    /// Rows whose watermark lapsed before the completion was emitted.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<JobProgress>, StoreError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;
}

/// Durable record that a job-level completion arrived. Unique on
/// `(job_id, name)` — the last line of defense against duplicate
/// transitions.
#[async_trait]
pub trait PhaseEventStore: Send + Sync {
    /// Records the receipt. `Ok(true)` when new, `Ok(false)` on duplicate.
    async fn insert(&self, job_id: &str, name: &str, event_id: Uuid) -> Result<bool, StoreError>;

    /// Names received so far for the job.
    async fn names_for_job(&self, job_id: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError>;
}

/// The idempotency ledger: `processed_events(event_id UNIQUE)`.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Insert-if-absent. `Ok(true)` on first observation; `Ok(false)`
    /// means the event was already handled and the caller must ack
    /// without side effects.
    async fn insert(&self, event_id: Uuid, job_id: &str) -> Result<bool, StoreError>;

    async fn contains(&self, event_id: Uuid) -> Result<bool, StoreError>;

    /// Removes every ledger entry of the job; returns how many.
    async fn delete_job(&self, job_id: &str) -> Result<u64, StoreError>;
}

/// Accepted matches, unique on `(job_id, product_id, video_id)`.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Upsert on the uniqueness key. `Ok(true)` when inserted, `Ok(false)`
    /// when an existing row was replaced.
    async fn upsert(&self, record: MatchRecord) -> Result<bool, StoreError>;

    async fn get(
        &self,
        job_id: &str,
        product_id: &str,
        video_id: &str,
    ) -> Result<Option<MatchRecord>, StoreError>;

    async fn set_evidence_path(
        &self,
        job_id: &str,
        product_id: &str,
        video_id: &str,
        path: String,
    ) -> Result<(), StoreError>;

    async fn for_job(&self, job_id: &str) -> Result<Vec<MatchRecord>, StoreError>;

    /// Removes the job's matches; returns how many.
    async fn delete_job(&self, job_id: &str) -> Result<u64, StoreError>;
}
