//! # Pipeline Runtime
//!
//! Builds and runs the matching pipeline: in-process event bus, stores,
//! and the four workers (feature tracker, matcher, evidence coordinator,
//! transition manager), plus the job service the API layer binds to.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod container;

pub use config::PipelineConfig;
pub use container::Pipeline;
