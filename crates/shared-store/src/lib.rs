//! # Shared Store - Storage Ports for the Matching Pipeline
//!
//! Storage is expressed as async ports so workers never couple to a
//! backend:
//!
//! - in-memory adapters back single-node operation and the test harness;
//! - the RocksDB adapter (feature `rocksdb`) makes the idempotency ledger
//!   and phase receipts durable, so barrier evaluation survives restarts.
//!
//! ## Concurrency Rules
//!
//! - `JobProgress` mutations are serialized per `(job_id, stage)` — the
//!   row-lock equivalent. Without it, "emit completed exactly once" breaks
//!   under redelivery.
//! - Phase transitions are compare-and-set on the current phase.
//! - The processed-event ledger is insert-if-absent; duplicates
//!   short-circuit handlers.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod blobs;
pub mod memory;
pub mod ports;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use blobs::{BlobRoot, DataDirLock, LockError};
pub use memory::{
    InMemoryCatalogStore, InMemoryJobStore, InMemoryMatchStore, InMemoryPhaseEventStore,
    InMemoryProcessedEventStore, InMemoryProgressStore, MemoryStores,
};
pub use ports::{
    CatalogStore, JobStore, MatchStore, PhaseEventStore, ProcessedEventStore, ProgressStore,
};
#[cfg(feature = "rocksdb")]
pub use rocks::RocksLedger;
