//! Keypoint blobs.
//!
//! A blob is a `bincode`-encoded [`KeypointSet`]: 2D points plus 256-bit
//! binary descriptors, written once by the keypoint worker under
//! `keypoints/<asset_id>.kp`. A missing blob means "feature absent" and
//! triggers the matcher's geometric fallback.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

/// Blob codec errors.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob exists but does not decode.
    #[error("Corrupt keypoint blob: {0}")]
    Corrupt(String),

    /// Filesystem failure other than not-found.
    #[error("Keypoint blob I/O: {0}")]
    Io(#[from] io::Error),
}

/// A detected keypoint position, pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// Keypoints of one asset with their binary descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    pub points: Vec<Keypoint>,
    /// 256-bit descriptors, one per point.
    pub descriptors: Vec<[u8; 32]>,
}

impl KeypointSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Serializes to the on-disk blob format.
    pub fn encode(&self) -> Result<Vec<u8>, BlobError> {
        bincode::serialize(self).map_err(|e| BlobError::Corrupt(e.to_string()))
    }

    /// Deserializes from the on-disk blob format.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlobError> {
        bincode::deserialize(bytes).map_err(|e| BlobError::Corrupt(e.to_string()))
    }

    /// Loads a blob from disk. A missing file is `Ok(None)` — the
    /// "feature absent" signal, not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, BlobError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(Self::decode(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    /// Writes the blob (fixtures and the keypoint worker use this).
    pub fn save(&self, path: &Path) -> Result<(), BlobError> {
        std::fs::write(path, self.encode()?)?;
        Ok(())
    }
}
