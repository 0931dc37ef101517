//! Aggregation domain: the pure stage state machine and the stage-to-topic
//! wiring. No I/O here; everything runs under the progress row lock.

pub mod progress;
pub mod stages;

pub use progress::{
    apply_batch, apply_ready, claim_completion, claim_watermark_completion,
    required_for_completion, BatchOutcome, CompletionSummary,
};
pub use stages::{completion_payload, stage_for_batch, stage_for_ready, zero_masked_forward};
