//! Evidence artifact writing.
//!
//! Rendering a composited side-by-side image is the front-end's concern;
//! the pipeline persists a descriptor artifact naming the best pair so
//! the renderer (and any reviewer) has everything it needs.

use shared_bus::payloads::MatchResult;
use shared_store::blobs::BlobRoot;
use std::io;

/// Writes evidence descriptors into the blob root.
pub struct EvidenceBuilder {
    root: BlobRoot,
}

impl EvidenceBuilder {
    #[must_use]
    pub fn new(root: BlobRoot) -> Self {
        Self { root }
    }

    /// Writes the artifact for one accepted pair and returns its
    /// absolute path. Write-once: re-writing the same pair produces the
    /// same path and identical content modulo the timestamp.
    pub fn write_artifact(&self, result: &MatchResult) -> Result<String, io::Error> {
        let path = self
            .root
            .evidence_path(&result.job_id, &result.product_id, &result.video_id);

        let artifact = serde_json::json!({
            "job_id": result.job_id,
            "product_id": result.product_id,
            "video_id": result.video_id,
            "best_pair": {
                "img_id": result.best_pair.img_id,
                "frame_id": result.best_pair.frame_id,
                "score_pair": result.best_pair.score_pair,
            },
            "score": result.score,
            "ts": result.ts,
            "generated_at": chrono::Utc::now().to_rfc3339(),
        });

        std::fs::write(&path, serde_json::to_vec_pretty(&artifact)?)?;
        Ok(path.to_string_lossy().into_owned())
    }
}
