//! # In-Memory Adapters
//!
//! Backing for single-node operation and the test harness. All adapters
//! are cheap to clone behind `Arc` and never hold a lock across an await.

use crate::ports::{
    CatalogStore, JobStore, MatchStore, PhaseEventStore, ProcessedEventStore, ProgressMutator,
    ProgressStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use shared_types::entities::{
    Embedding, Job, JobCounts, JobPhase, JobProgress, MatchRecord, Product, ProductImage, Stage,
    Video, VideoFrame,
};
use shared_types::errors::StoreError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Conflict(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().get(job_id).cloned())
    }

    async fn phase(&self, job_id: &str) -> Result<Option<JobPhase>, StoreError> {
        Ok(self.jobs.read().get(job_id).map(|j| j.phase))
    }

    async fn transition_phase(
        &self,
        job_id: &str,
        from: JobPhase,
        to: JobPhase,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            });
        };
        if job.phase != from {
            return Ok(false);
        }
        job.phase = to;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_cancelled(
        &self,
        job_id: &str,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if job.phase != JobPhase::Cancelled {
            let now = Utc::now();
            job.phase = JobPhase::Cancelled;
            job.cancelled_at = Some(now);
            job.cancellation_reason = reason;
            job.cancellation_notes = notes;
            job.updated_at = now;
        }
        Ok(Some(job.clone()))
    }

    async fn mark_failed(&self, job_id: &str, reason: String) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            });
        };
        // Terminal phases are sticky; a late failure never resurrects a
        // cancelled or completed job.
        if !job.phase.is_terminal() {
            job.phase = JobPhase::Failed;
            job.failure_reason = Some(reason);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_counts(&self, job_id: &str, counts: JobCounts) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(job_id) else {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            });
        };
        job.counts = counts;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(self.jobs.write().remove(job_id).is_some())
    }
}

/// In-memory [`CatalogStore`] with per-kind indices.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    products: RwLock<HashMap<String, Product>>,
    images: RwLock<HashMap<String, ProductImage>>,
    videos: RwLock<HashMap<String, Video>>,
    frames: RwLock<HashMap<String, VideoFrame>>,
}

impl InMemoryCatalogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        self.products
            .write()
            .insert(product.product_id.clone(), product);
        Ok(())
    }

    async fn upsert_product_image(&self, image: ProductImage) -> Result<(), StoreError> {
        self.images.write().insert(image.img_id.clone(), image);
        Ok(())
    }

    async fn upsert_video(&self, video: Video) -> Result<(), StoreError> {
        self.videos.write().insert(video.video_id.clone(), video);
        Ok(())
    }

    async fn upsert_video_frame(&self, frame: VideoFrame) -> Result<(), StoreError> {
        self.frames.write().insert(frame.frame_id.clone(), frame);
        Ok(())
    }

    async fn products_for_job(&self, job_id: &str) -> Result<Vec<Product>, StoreError> {
        let mut rows: Vec<_> = self
            .products
            .read()
            .values()
            .filter(|p| p.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(rows)
    }

    async fn product_images_for_job(&self, job_id: &str) -> Result<Vec<ProductImage>, StoreError> {
        let mut rows: Vec<_> = self
            .images
            .read()
            .values()
            .filter(|i| i.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.img_id.cmp(&b.img_id));
        Ok(rows)
    }

    async fn videos_for_job(&self, job_id: &str) -> Result<Vec<Video>, StoreError> {
        let mut rows: Vec<_> = self
            .videos
            .read()
            .values()
            .filter(|v| v.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.video_id.cmp(&b.video_id));
        Ok(rows)
    }

    async fn video_frames_for_job(&self, job_id: &str) -> Result<Vec<VideoFrame>, StoreError> {
        let mut rows: Vec<_> = self
            .frames
            .read()
            .values()
            .filter(|f| f.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.frame_id.cmp(&b.frame_id));
        Ok(rows)
    }

    async fn set_image_mask(&self, image_id: &str, mask_path: String) -> Result<(), StoreError> {
        let mut images = self.images.write();
        let Some(image) = images.get_mut(image_id) else {
            return Err(StoreError::NotFound {
                entity: "product_image",
                id: image_id.to_string(),
            });
        };
        image.masked_local_path = Some(mask_path);
        Ok(())
    }

    async fn set_image_embeddings(
        &self,
        image_id: &str,
        emb_rgb: Option<Embedding>,
        emb_gray: Option<Embedding>,
    ) -> Result<(), StoreError> {
        let mut images = self.images.write();
        let Some(image) = images.get_mut(image_id) else {
            return Err(StoreError::NotFound {
                entity: "product_image",
                id: image_id.to_string(),
            });
        };
        image.emb_rgb = emb_rgb;
        image.emb_gray = emb_gray;
        Ok(())
    }

    async fn set_image_keypoints(
        &self,
        image_id: &str,
        kp_blob_path: String,
    ) -> Result<(), StoreError> {
        let mut images = self.images.write();
        let Some(image) = images.get_mut(image_id) else {
            return Err(StoreError::NotFound {
                entity: "product_image",
                id: image_id.to_string(),
            });
        };
        image.kp_blob_path = Some(kp_blob_path);
        Ok(())
    }

    async fn set_frame_mask(&self, frame_id: &str, mask_path: String) -> Result<(), StoreError> {
        let mut frames = self.frames.write();
        let Some(frame) = frames.get_mut(frame_id) else {
            return Err(StoreError::NotFound {
                entity: "video_frame",
                id: frame_id.to_string(),
            });
        };
        frame.masked_local_path = Some(mask_path);
        Ok(())
    }

    async fn set_frame_embeddings(
        &self,
        frame_id: &str,
        emb_rgb: Option<Embedding>,
        emb_gray: Option<Embedding>,
    ) -> Result<(), StoreError> {
        let mut frames = self.frames.write();
        let Some(frame) = frames.get_mut(frame_id) else {
            return Err(StoreError::NotFound {
                entity: "video_frame",
                id: frame_id.to_string(),
            });
        };
        frame.emb_rgb = emb_rgb;
        frame.emb_gray = emb_gray;
        Ok(())
    }

    async fn set_frame_keypoints(
        &self,
        frame_id: &str,
        kp_blob_path: String,
    ) -> Result<(), StoreError> {
        let mut frames = self.frames.write();
        let Some(frame) = frames.get_mut(frame_id) else {
            return Err(StoreError::NotFound {
                entity: "video_frame",
                id: frame_id.to_string(),
            });
        };
        frame.kp_blob_path = Some(kp_blob_path);
        Ok(())
    }

    async fn counts_for_job(&self, job_id: &str) -> Result<JobCounts, StoreError> {
        Ok(JobCounts {
            products: self
                .products
                .read()
                .values()
                .filter(|p| p.job_id == job_id)
                .count() as u64,
            videos: self
                .videos
                .read()
                .values()
                .filter(|v| v.job_id == job_id)
                .count() as u64,
            images: self
                .images
                .read()
                .values()
                .filter(|i| i.job_id == job_id)
                .count() as u64,
            frames: self
                .frames
                .read()
                .values()
                .filter(|f| f.job_id == job_id)
                .count() as u64,
        })
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        // Leaf rows first, mirroring the relational cascade order.
        self.frames.write().retain(|_, f| f.job_id != job_id);
        self.images.write().retain(|_, i| i.job_id != job_id);
        self.videos.write().retain(|_, v| v.job_id != job_id);
        self.products.write().retain(|_, p| p.job_id != job_id);
        Ok(())
    }
}

/// In-memory [`ProgressStore`] with one async mutex per row.
#[derive(Default)]
pub struct InMemoryProgressStore {
    rows: Mutex<HashMap<(String, Stage), Arc<tokio::sync::Mutex<JobProgress>>>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, job_id: &str, stage: Stage) -> Arc<tokio::sync::Mutex<JobProgress>> {
        let key = (job_id.to_string(), stage);
        Arc::clone(
            self.rows
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(JobProgress::new(job_id, stage)))),
        )
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn update(
        &self,
        job_id: &str,
        stage: Stage,
        f: ProgressMutator<'_>,
    ) -> Result<JobProgress, StoreError> {
        let row = self.row(job_id, stage);
        let mut guard = row.lock().await;
        f(&mut guard);
        Ok(guard.clone())
    }

    async fn get(&self, job_id: &str, stage: Stage) -> Result<Option<JobProgress>, StoreError> {
        let key = (job_id.to_string(), stage);
        let row = { self.rows.lock().get(&key).map(Arc::clone) };
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<JobProgress>, StoreError> {
        let rows: Vec<_> = self.rows.lock().values().map(Arc::clone).collect();
        let mut due = Vec::new();
        for row in rows {
            let guard = row.lock().await;
            if !guard.completion_emitted
                && guard
                    .watermark_expires_at
                    .is_some_and(|expires| expires <= now)
            {
                due.push(guard.clone());
            }
        }
        Ok(due)
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.rows.lock().retain(|(id, _), _| id != job_id);
        Ok(())
    }
}

/// In-memory [`PhaseEventStore`].
#[derive(Default)]
pub struct InMemoryPhaseEventStore {
    received: Mutex<HashMap<String, Vec<(String, Uuid, DateTime<Utc>)>>>,
}

impl InMemoryPhaseEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PhaseEventStore for InMemoryPhaseEventStore {
    async fn insert(&self, job_id: &str, name: &str, event_id: Uuid) -> Result<bool, StoreError> {
        let mut received = self.received.lock();
        let entries = received.entry(job_id.to_string()).or_default();
        if entries.iter().any(|(n, _, _)| n == name) {
            return Ok(false);
        }
        entries.push((name.to_string(), event_id, Utc::now()));
        Ok(true)
    }

    async fn names_for_job(&self, job_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .received
            .lock()
            .get(job_id)
            .map(|entries| entries.iter().map(|(n, _, _)| n.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        self.received.lock().remove(job_id);
        Ok(())
    }
}

/// In-memory [`ProcessedEventStore`].
#[derive(Default)]
pub struct InMemoryProcessedEventStore {
    seen: Mutex<HashSet<Uuid>>,
    by_job: Mutex<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryProcessedEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn insert(&self, event_id: Uuid, job_id: &str) -> Result<bool, StoreError> {
        let mut seen = self.seen.lock();
        if !seen.insert(event_id) {
            return Ok(false);
        }
        self.by_job
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push(event_id);
        Ok(true)
    }

    async fn contains(&self, event_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.seen.lock().contains(&event_id))
    }

    async fn delete_job(&self, job_id: &str) -> Result<u64, StoreError> {
        let ids = self.by_job.lock().remove(job_id).unwrap_or_default();
        let mut seen = self.seen.lock();
        for id in &ids {
            seen.remove(id);
        }
        Ok(ids.len() as u64)
    }
}

/// In-memory [`MatchStore`] keyed on `(job_id, product_id, video_id)`.
#[derive(Default)]
pub struct InMemoryMatchStore {
    matches: RwLock<HashMap<(String, String, String), MatchRecord>>,
}

impl InMemoryMatchStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(job_id: &str, product_id: &str, video_id: &str) -> (String, String, String) {
        (
            job_id.to_string(),
            product_id.to_string(),
            video_id.to_string(),
        )
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn upsert(&self, record: MatchRecord) -> Result<bool, StoreError> {
        let key = Self::key(&record.job_id, &record.product_id, &record.video_id);
        Ok(self.matches.write().insert(key, record).is_none())
    }

    async fn get(
        &self,
        job_id: &str,
        product_id: &str,
        video_id: &str,
    ) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self
            .matches
            .read()
            .get(&Self::key(job_id, product_id, video_id))
            .cloned())
    }

    async fn set_evidence_path(
        &self,
        job_id: &str,
        product_id: &str,
        video_id: &str,
        path: String,
    ) -> Result<(), StoreError> {
        let mut matches = self.matches.write();
        let Some(record) = matches.get_mut(&Self::key(job_id, product_id, video_id)) else {
            return Err(StoreError::NotFound {
                entity: "match",
                id: format!("{job_id}/{product_id}/{video_id}"),
            });
        };
        record.evidence_path = Some(path);
        Ok(())
    }

    async fn for_job(&self, job_id: &str) -> Result<Vec<MatchRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .matches
            .read()
            .values()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.product_id, &a.video_id).cmp(&(&b.product_id, &b.video_id))
        });
        Ok(rows)
    }

    async fn delete_job(&self, job_id: &str) -> Result<u64, StoreError> {
        let mut matches = self.matches.write();
        let before = matches.len();
        matches.retain(|(id, _, _), _| id != job_id);
        Ok((before - matches.len()) as u64)
    }
}

/// The full in-memory store set, wired together for the runtime container
/// and the test harness.
#[derive(Clone)]
pub struct MemoryStores {
    pub jobs: Arc<InMemoryJobStore>,
    pub catalog: Arc<InMemoryCatalogStore>,
    pub progress: Arc<InMemoryProgressStore>,
    pub phase_events: Arc<InMemoryPhaseEventStore>,
    pub ledger: Arc<InMemoryProcessedEventStore>,
    pub matches: Arc<InMemoryMatchStore>,
}

impl MemoryStores {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobStore::new()),
            catalog: Arc::new(InMemoryCatalogStore::new()),
            progress: Arc::new(InMemoryProgressStore::new()),
            phase_events: Arc::new(InMemoryPhaseEventStore::new()),
            ledger: Arc::new(InMemoryProcessedEventStore::new()),
            matches: Arc::new(InMemoryMatchStore::new()),
        }
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new()
    }
}
