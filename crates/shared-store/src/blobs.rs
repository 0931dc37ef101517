//! # Blob Root
//!
//! Layout of the content-addressed blob store and the exclusive lock that
//! prevents two runtimes from sharing one data root.
//!
//! Blobs are write-once: exactly one producer writes each mask, embedding,
//! or keypoint blob. Readers treat a missing blob as "feature absent" and
//! apply the matcher's fallback rule.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from data-root locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock file could not be created.
    #[error("Failed to create lock file: {0}")]
    CreateFailed(io::Error),

    /// Data root is already locked by another process.
    #[error("Data root already in use (pid {pid:?}) at {}", .path.display())]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },

    /// Failed to write the PID to the lock file.
    #[error("Failed to write PID to lock file: {0}")]
    WriteFailed(io::Error),
}

/// Exclusive lock on the data root. Acquired at startup, released on drop.
pub struct DataDirLock {
    file: File,
    path: PathBuf,
    pid: u32,
}

impl DataDirLock {
    const LOCK_FILE: &'static str = "LOCK";

    /// Acquires an exclusive lock on `data_root`.
    ///
    /// # Errors
    ///
    /// [`LockError::AlreadyLocked`] when another process holds the lock.
    pub fn acquire(data_root: &Path) -> Result<Self, LockError> {
        let lock_path = data_root.join(Self::LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            let existing_pid = std::fs::read_to_string(&lock_path)
                .ok()
                .and_then(|s| s.trim().parse().ok());
            return Err(LockError::AlreadyLocked {
                pid: existing_pid,
                path: lock_path,
            });
        }

        let pid = std::process::id();
        let mut locked = file;
        writeln!(locked, "{pid}").map_err(LockError::WriteFailed)?;
        locked.sync_all().map_err(LockError::WriteFailed)?;

        Ok(Self {
            file: locked,
            path: lock_path,
            pid,
        })
    }

    /// PID of the process holding the lock.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The blob-store layout under a data root. Paths persisted in rows are
/// absolute; the API layer converts them to URLs.
#[derive(Debug, Clone)]
pub struct BlobRoot {
    root: PathBuf,
}

impl BlobRoot {
    /// Wraps `root` and creates the directory layout.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, io::Error> {
        let this = Self { root: root.into() };
        for dir in [
            this.images_dir(),
            this.frames_dir(),
            this.product_masks_dir(),
            this.frame_masks_dir(),
            this.keypoints_dir(),
            this.evidence_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(this)
    }

    /// The data root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    #[must_use]
    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    #[must_use]
    pub fn product_masks_dir(&self) -> PathBuf {
        self.root.join("masks_product").join("product_images")
    }

    #[must_use]
    pub fn frame_masks_dir(&self) -> PathBuf {
        self.root.join("masks_product").join("video_frames")
    }

    #[must_use]
    pub fn keypoints_dir(&self) -> PathBuf {
        self.root.join("keypoints")
    }

    #[must_use]
    pub fn evidence_dir(&self) -> PathBuf {
        self.root.join("evidence")
    }

    /// Absolute path for a keypoint blob.
    #[must_use]
    pub fn keypoint_blob_path(&self, asset_id: &str) -> PathBuf {
        self.keypoints_dir().join(format!("{asset_id}.kp"))
    }

    /// Absolute path for an evidence artifact.
    #[must_use]
    pub fn evidence_path(&self, job_id: &str, product_id: &str, video_id: &str) -> PathBuf {
        self.evidence_dir()
            .join(format!("{job_id}_{product_id}_{video_id}.json"))
    }
}
