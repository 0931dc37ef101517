//! # pvm-04-transition
//!
//! The authoritative job state machine.
//!
//! ## Role in System
//!
//! - Subscribes **only** to the eight job-level `*.completed` topics;
//!   never counts per-asset events.
//! - Records each completion in the phase-event receipts
//!   (`UNIQUE(job_id, name)`), evaluates the barrier table, and advances
//!   the phase with a compare-and-set.
//! - Publishes the next-phase requests: collection requests at job start,
//!   `match.request` exactly when entering `matching`.
//! - Owns the job service operations: start, status, cancel, delete.
//!
//! ## Barrier Table
//!
//! | From | Required completions (all of) | To |
//! |------|-------------------------------|----|
//! | collection | products.collections.completed, videos.collections.completed | feature_extraction |
//! | feature_extraction | image/video embeddings + keypoints completed | matching |
//! | matching | match.request.completed | evidence |
//! | evidence | evidences.generation.completed | completed |
//!
//! Products-only and videos-only jobs relax the required sets to the
//! sides they actually collect.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod service;
pub mod worker;

pub use domain::{barrier_met, next_phase, required_completions};
pub use service::{
    CancelOutcome, DeleteOutcome, JobService, JobStatus, StartJobRequest, StartOutcome,
};
pub use worker::{TransitionConfig, TransitionManager};
