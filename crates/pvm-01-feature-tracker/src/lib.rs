//! # pvm-01-feature-tracker
//!
//! Completion aggregator for the matching pipeline.
//!
//! ## Role in System
//!
//! - **Choreography Participant**: Subscribes to per-asset `*.ready`
//!   events and per-job `*.batch` totals; publishes the four per-job
//!   feature completions exactly once each.
//! - **Zero-Asset Fast Path**: a batch announcing zero assets forwards a
//!   zero masked batch so every downstream stage completes immediately.
//! - **Watermark**: a stage that misses its threshold emits a partial
//!   completion when the watermark lapses, so the pipeline never stalls
//!   on stragglers.
//!
//! ## Choreography Flow
//!
//! ```text
//! collectors ──*.ready / *.ready.batch──→ [Event Bus]
//!                                             │
//!                                             ↓
//!                                    [Feature Tracker]
//!                                             │
//!          image.embeddings.completed  video.embeddings.completed
//!          image.keypoints.completed   video.keypoints.completed
//!                                             │
//!                                             ↓
//!                                   [Transition Manager]
//! ```
//!
//! ## Aggregation Invariants
//!
//! | ID | Invariant | Enforcement |
//! |----|-----------|-------------|
//! | AGG-1 | One completion per `(job_id, stage)` | `completion_emitted` claimed under the row lock |
//! | AGG-2 | `done` monotonic, `done <= expected` when known | `domain::apply_ready` saturation |
//! | AGG-3 | Threshold uses integer ceiling math | `domain::required_for_completion` |
//! | AGG-4 | Later duplicate batch total wins, post-completion batch ignored | `domain::apply_batch` |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod worker;

pub use config::TrackerConfig;
pub use worker::{spawn_watermark_sweeper, FeatureTracker};
