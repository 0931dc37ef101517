//! # RocksDB Ledger
//!
//! Durable adapter for the idempotency ledger and the phase receipts.
//! Surviving restarts is what makes barrier evaluation safe: a completion
//! that was recorded before a crash is still recorded after it, and a
//! redelivered event is still a duplicate.
//!
//! ## Layout
//!
//! | Column family | Key | Value |
//! |---------------|-----|-------|
//! | `processed_events` | `event_id` (16 bytes) | `job_id` (utf-8) |
//! | `processed_events` | `job/<job_id>/<event_id>` | empty (job index) |
//! | `phase_events` | `<job_id>\0<name>` | bincode `PhaseReceipt` |

use crate::ports::{PhaseEventStore, ProcessedEventStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use shared_types::errors::StoreError;
use std::path::Path;
use uuid::Uuid;

const CF_PROCESSED: &str = "processed_events";
const CF_PHASE: &str = "phase_events";

#[derive(Debug, Serialize, Deserialize)]
struct PhaseReceipt {
    event_id: Uuid,
    received_at_unix: u64,
}

/// Durable ledger + receipts in a single RocksDB instance.
///
/// The check-then-write pairs are guarded by a process-wide mutex; the
/// adapter assumes a single writer process (the data dir is protected by
/// [`crate::blobs::DataDirLock`]).
pub struct RocksLedger {
    db: DB,
    write_guard: Mutex<()>,
}

impl RocksLedger {
    /// Opens (or creates) the ledger under `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_PROCESSED, Options::default()),
            ColumnFamilyDescriptor::new(CF_PHASE, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            db,
            write_guard: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
    }

    fn job_index_key(job_id: &str, event_id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + job_id.len() + 1 + 16);
        key.extend_from_slice(b"job/");
        key.extend_from_slice(job_id.as_bytes());
        key.push(b'/');
        key.extend_from_slice(event_id.as_bytes());
        key
    }

    fn phase_key(job_id: &str, name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(job_id.len() + 1 + name.len());
        key.extend_from_slice(job_id.as_bytes());
        key.push(0);
        key.extend_from_slice(name.as_bytes());
        key
    }
}

#[async_trait]
impl ProcessedEventStore for RocksLedger {
    async fn insert(&self, event_id: Uuid, job_id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_PROCESSED)?;
        let _guard = self.write_guard.lock();

        let existing = self
            .db
            .get_cf(cf, event_id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if existing.is_some() {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf, event_id.as_bytes(), job_id.as_bytes());
        batch.put_cf(cf, Self::job_index_key(job_id, event_id), []);
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }

    async fn contains(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_PROCESSED)?;
        Ok(self
            .db
            .get_cf(cf, event_id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .is_some())
    }

    async fn delete_job(&self, job_id: &str) -> Result<u64, StoreError> {
        let cf = self.cf(CF_PROCESSED)?;
        let _guard = self.write_guard.lock();

        let prefix = format!("job/{job_id}/");
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let event_bytes = &key[prefix.len()..];
            batch.delete_cf(cf, event_bytes);
            batch.delete_cf(cf, &key);
            removed += 1;
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(removed)
    }
}

#[async_trait]
impl PhaseEventStore for RocksLedger {
    async fn insert(&self, job_id: &str, name: &str, event_id: Uuid) -> Result<bool, StoreError> {
        let cf = self.cf(CF_PHASE)?;
        let _guard = self.write_guard.lock();

        let key = Self::phase_key(job_id, name);
        let existing = self
            .db
            .get_cf(cf, &key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if existing.is_some() {
            return Ok(false);
        }

        let receipt = PhaseReceipt {
            event_id,
            received_at_unix: shared_types::envelope::current_unix_secs(),
        };
        let value = bincode::serialize(&receipt).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.db
            .put_cf(cf, &key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(true)
    }

    async fn names_for_job(&self, job_id: &str) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_PHASE)?;
        let mut prefix = job_id.as_bytes().to_vec();
        prefix.push(0);

        let mut names = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            names.push(name);
        }
        Ok(names)
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_PHASE)?;
        let _guard = self.write_guard.lock();

        let mut prefix = job_id.as_bytes().to_vec();
        prefix.push(0);

        let mut batch = WriteBatch::default();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward))
        {
            let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(cf, &key);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
