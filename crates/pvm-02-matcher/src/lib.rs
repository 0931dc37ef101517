//! # pvm-02-matcher
//!
//! The matcher engine: decides which (product, video) pairs are
//! confidently visible matches.
//!
//! ## Decision Contract
//!
//! 1. **Candidate retrieval** — per product image, cosine top-K over the
//!    job's frames, RGB and gray channels fused 0.7/0.3; candidates below
//!    `SIM_DEEP_MIN` are dropped.
//! 2. **Pair scoring** — `score_pair = 0.6·s_deep + 0.4·s_kp` where
//!    `s_kp` is the RANSAC inlier ratio; with a keypoint blob missing on
//!    either side, `s_kp := s_deep` (the geometric channel can never
//!    boost beyond the embedding signal).
//! 3. **Acceptance** — best pair `>= MATCH_BEST_MIN`, at least
//!    `MATCH_CONS_MIN` supporting pairs, fused score
//!    `max·0.5 + mean(top-N)·0.5 >= MATCH_ACCEPT`.
//! 4. **Determinism** — stable tie-breaks (score, `s_deep`, earliest
//!    `ts`, lexicographic ids) and seeded RANSAC sampling: identical
//!    inputs produce identical accepted sets across runs and machines.
//!
//! The whole `match.request` is the idempotency unit: redelivery is
//! suppressed by the processed-event ledger, so `match.request.completed`
//! is published exactly once per request event.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod engine;
pub mod worker;

pub use config::MatcherConfig;
pub use engine::{AcceptedMatch, MatchEngine};
pub use worker::MatcherWorker;
