//! # pvm-03-evidence
//!
//! Evidence coordinator for the matching pipeline.
//!
//! ## Role in System
//!
//! - Consumes `match.result` for per-pair artifact work: writes an
//!   evidence descriptor under `evidence/` and records the path on the
//!   match row.
//! - Consumes `match.request.completed` for the announced pair count.
//! - Publishes `evidences.generation.completed` exactly once per job,
//!   after every announced pair is processed — immediately when the
//!   matcher announced zero matches (zero-match fast path).
//!
//! There is no ordering between results and the completion event; the
//! coordinator evaluates after every arrival and completes whichever
//! arrives last.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod builder;
pub mod worker;

pub use builder::EvidenceBuilder;
pub use worker::EvidenceCoordinator;
