//! Test harness: a full pipeline with simulated external producers.
//!
//! The real collectors, segmentor, and feature workers are out-of-process
//! services; the harness plays their role by writing catalog rows and
//! publishing the events they would emit.

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_runtime::{Pipeline, PipelineConfig};
use shared_bus::exchange::TopicExchange;
use shared_bus::payloads::{
    AssetReady, EventPayload, JobCompletion, KeyframeRef, ProductImageReady, ProductImagesBatch,
    VideoKeyframesBatch, VideoKeyframesReady,
};
use shared_bus::publisher::EventPublisher;
use shared_bus::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use shared_bus::topics::Topic;
use shared_store::ports::CatalogStore as _;
use shared_types::entities::{
    Embedding, Marketplace, Platform, Product, ProductImage, Video, VideoFrame,
};
use shared_types::errors::HandlerError;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

/// Records every payload it sees, for assertions on emitted events.
pub struct Recorder {
    seen: Mutex<Vec<EventPayload>>,
}

impl Recorder {
    #[must_use]
    pub fn count(&self, topic: Topic) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|p| p.topic() == topic)
            .count()
    }

    #[must_use]
    pub fn payloads(&self, topic: Topic) -> Vec<EventPayload> {
        self.seen
            .lock()
            .iter()
            .filter(|p| p.topic() == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        self.seen.lock().push(delivery.payload);
        Ok(())
    }
}

/// A wired pipeline plus the observation taps the scenarios assert on.
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub recorder: Arc<Recorder>,
    _dir: TempDir,
    _taps: Vec<SubscriptionHandle>,
}

impl TestPipeline {
    /// Topics the recorder taps.
    const TAPPED: [Topic; 12] = [
        Topic::ProductsCollectRequest,
        Topic::VideosSearchRequest,
        Topic::ProductsImagesMaskedBatch,
        Topic::VideoKeyframesMaskedBatch,
        Topic::ImageEmbeddingsCompleted,
        Topic::ImageKeypointsCompleted,
        Topic::VideoEmbeddingsCompleted,
        Topic::VideoKeypointsCompleted,
        Topic::MatchRequest,
        Topic::MatchResult,
        Topic::MatchRequestCompleted,
        Topic::EvidencesGenerationCompleted,
    ];

    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            data_root: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::start(config).unwrap();

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let taps = Self::TAPPED
            .iter()
            .map(|&topic| {
                pipeline
                    .bus
                    .subscribe(topic, "test-recorder", recorder.clone() as _)
            })
            .collect();

        Self {
            pipeline,
            recorder,
            _dir: dir,
            _taps: taps,
        }
    }

    pub fn bus(&self) -> &Arc<TopicExchange> {
        &self.pipeline.bus
    }

    pub async fn publish(&self, payload: EventPayload) {
        self.bus().publish(payload).await.unwrap();
    }

    /// Polls until the recorder has seen `count` events on `topic`.
    pub async fn wait_for_events(&self, topic: Topic, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.recorder.count(topic) >= count {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "saw {} events on {topic}, wanted {count}",
                self.recorder.count(topic)
            );
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls until the job reports `phase`, failing after `timeout`.
    pub async fn wait_for_phase(&self, job_id: &str, phase: &str, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.pipeline.service.get_status(job_id).await.unwrap();
            if status.phase == phase {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "job {job_id} stuck in phase {} waiting for {phase}",
                status.phase
            );
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Simulates the product collector: catalog rows for `products`
    /// (each with its images and an embedding axis), then the per-asset
    /// readies, the batch total, and the collection completion.
    pub async fn simulate_product_collection(
        &self,
        job_id: &str,
        products: &[(&str, Vec<(&str, Embedding)>)],
    ) {
        let mut total_images = 0u64;
        for (product_id, images) in products {
            self.pipeline
                .stores
                .catalog
                .upsert_product(Product {
                    product_id: (*product_id).to_string(),
                    job_id: job_id.to_string(),
                    src: Marketplace::Amazon,
                    asin_or_itemid: format!("ASIN-{product_id}"),
                    title: format!("Product {product_id}"),
                    brand: None,
                    url: format!("https://example.com/{product_id}"),
                    marketplace: "amazon.com".to_string(),
                    price: Some(19.99),
                })
                .await
                .unwrap();

            for (img_id, embedding) in images {
                total_images += 1;
                self.pipeline
                    .stores
                    .catalog
                    .upsert_product_image(ProductImage {
                        img_id: (*img_id).to_string(),
                        product_id: (*product_id).to_string(),
                        job_id: job_id.to_string(),
                        local_path: format!("/data/images/{img_id}.jpg"),
                        masked_local_path: None,
                        emb_rgb: Some(embedding.clone()),
                        emb_gray: None,
                        kp_blob_path: None,
                    })
                    .await
                    .unwrap();
                self.publish(EventPayload::ProductsImageReady(ProductImageReady {
                    event_id: Uuid::new_v4(),
                    job_id: job_id.to_string(),
                    product_id: (*product_id).to_string(),
                    image_id: (*img_id).to_string(),
                    local_path: format!("/data/images/{img_id}.jpg"),
                    metadata: None,
                }))
                .await;
            }
        }

        self.publish(EventPayload::ProductsImagesReadyBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            total_images,
            watermark_ttl: None,
        }))
        .await;
        self.publish(EventPayload::ProductsCollectionsCompleted(JobCompletion {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
        }))
        .await;
    }

    /// Simulates the video crawler for one video with the given frames
    /// (`(frame_id, ts, embedding)`).
    pub async fn simulate_video_collection(
        &self,
        job_id: &str,
        video_id: &str,
        frames: &[(&str, f64, Embedding)],
    ) {
        self.pipeline
            .stores
            .catalog
            .upsert_video(Video {
                video_id: video_id.to_string(),
                job_id: job_id.to_string(),
                platform: Platform::Youtube,
                url: format!("https://youtube.com/watch?v={video_id}"),
                title: format!("Video {video_id}"),
                duration_s: 60.0,
                published_at: None,
                frame_count: frames.len() as u64,
            })
            .await
            .unwrap();

        let mut refs = Vec::new();
        for (frame_id, ts, embedding) in frames {
            self.pipeline
                .stores
                .catalog
                .upsert_video_frame(VideoFrame {
                    frame_id: (*frame_id).to_string(),
                    video_id: video_id.to_string(),
                    job_id: job_id.to_string(),
                    ts: *ts,
                    local_path: format!("/data/frames/{frame_id}.jpg"),
                    masked_local_path: None,
                    emb_rgb: Some(embedding.clone()),
                    emb_gray: None,
                    kp_blob_path: None,
                })
                .await
                .unwrap();
            refs.push(KeyframeRef {
                frame_id: (*frame_id).to_string(),
                ts: *ts,
                local_path: format!("/data/frames/{frame_id}.jpg"),
            });
        }

        self.publish(EventPayload::VideosKeyframesReady(VideoKeyframesReady {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            video_id: video_id.to_string(),
            frames: refs,
        }))
        .await;
        self.publish(EventPayload::VideosKeyframesReadyBatch(VideoKeyframesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            total_keyframes: frames.len() as u64,
            watermark_ttl: None,
        }))
        .await;
        self.publish(EventPayload::VideosCollectionsCompleted(JobCompletion {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
        }))
        .await;
    }

    /// Simulates segmentor batches plus the embedding and keypoint
    /// workers' per-asset readies for the given asset ids.
    pub async fn simulate_feature_extraction(
        &self,
        job_id: &str,
        image_ids: &[&str],
        frame_ids: &[&str],
    ) {
        self.publish(EventPayload::ProductsImagesMaskedBatch(ProductImagesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            total_images: image_ids.len() as u64,
            watermark_ttl: None,
        }))
        .await;
        self.publish(EventPayload::VideoKeyframesMaskedBatch(VideoKeyframesBatch {
            event_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            total_keyframes: frame_ids.len() as u64,
            watermark_ttl: None,
        }))
        .await;

        for img_id in image_ids {
            for build in [asset_ready_image_embedding, asset_ready_image_keypoint] {
                self.publish(build(job_id, img_id)).await;
            }
        }
        for frame_id in frame_ids {
            for build in [asset_ready_video_embedding, asset_ready_video_keypoint] {
                self.publish(build(job_id, frame_id)).await;
            }
        }
    }
}

/// A unit embedding along `axis`.
#[must_use]
pub fn unit_embedding(dim: usize, axis: usize) -> Embedding {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

fn asset_ready(job_id: &str, asset_id: &str) -> AssetReady {
    AssetReady {
        event_id: Uuid::new_v4(),
        job_id: job_id.to_string(),
        asset_id: asset_id.to_string(),
    }
}

fn asset_ready_image_embedding(job_id: &str, asset_id: &str) -> EventPayload {
    EventPayload::ImageEmbeddingReady(asset_ready(job_id, asset_id))
}

fn asset_ready_image_keypoint(job_id: &str, asset_id: &str) -> EventPayload {
    EventPayload::ImageKeypointReady(asset_ready(job_id, asset_id))
}

fn asset_ready_video_embedding(job_id: &str, asset_id: &str) -> EventPayload {
    EventPayload::VideoEmbeddingReady(asset_ready(job_id, asset_id))
}

fn asset_ready_video_keypoint(job_id: &str, asset_id: &str) -> EventPayload {
    EventPayload::VideoKeypointReady(asset_ready(job_id, asset_id))
}
