//! # Shared Types - Common Entities for the Matching Pipeline
//!
//! Defines the entities, error taxonomy, and event envelope used by every
//! worker in the product-video matching pipeline.
//!
//! ## Design Rules
//!
//! - All inter-worker communication flows over the shared bus; these types
//!   are the only vocabulary workers share.
//! - Broker-injected metadata (`EventMetadata`) is never persisted and
//!   business logic must not depend on it.
//! - `phase` advances only through the job DAG; backward transitions exist
//!   only toward `failed` and `cancelled`.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod timeouts;

pub use entities::{
    AssetTypes, Embedding, Job, JobCounts, JobPhase, JobQuery, JobProgress, Marketplace,
    MatchRecord, MatchStatus, Platform, Product, ProductImage, Stage, Video, VideoFrame, WorkerId,
};
pub use envelope::{Envelope, EventMetadata};
pub use errors::{HandlerError, JobServiceError, StoreError};
