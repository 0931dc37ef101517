//! The per-`(job_id, stage)` state machine.
//!
//! State transitions (run under the row lock):
//!
//! 1. Initial: `expected_known = false, done = 0, completion_emitted = false`.
//! 2. Batch arrival seeds `expected`; a second batch supersedes the total
//!    (later one wins); a batch after emission is ignored.
//! 3. Per-asset ready events increment `done`, saturating at `expected`
//!    once it is known.
//! 4. The completion fires once
//!    `done >= ceil(expected * threshold / 100)`, or at watermark expiry,
//!    whichever comes first — exactly once either way.

use chrono::{DateTime, Utc};
use shared_types::entities::JobProgress;

/// What a batch arrival did to the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// First batch for this row; `zero_assets` requests the fast path.
    Seeded { zero_assets: bool },
    /// A duplicate batch replaced the previous total (later one wins).
    Superseded { previous: u64, current: u64 },
    /// The completion was already emitted; the batch is ignored.
    IgnoredAlreadyCompleted,
}

/// Snapshot taken at the moment a completion is claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSummary {
    pub total_assets: u64,
    pub processed_assets: u64,
    pub failed_assets: u64,
    pub has_partial_completion: bool,
}

/// Integer-ceiling threshold: `ceil(expected * pct / 100)`.
///
/// Floating-point comparison here produces off-by-one on small batches;
/// the math stays in integers.
#[must_use]
pub fn required_for_completion(expected: u64, threshold_pct: u8) -> u64 {
    let pct = u64::from(threshold_pct.min(100));
    expected.saturating_mul(pct).div_ceil(100)
}

/// Applies a batch total to the row.
pub fn apply_batch(
    row: &mut JobProgress,
    total: u64,
    watermark_expires_at: DateTime<Utc>,
) -> BatchOutcome {
    if row.completion_emitted {
        return BatchOutcome::IgnoredAlreadyCompleted;
    }
    if row.expected_known {
        let previous = row.expected;
        row.expected = total;
        return BatchOutcome::Superseded {
            previous,
            current: total,
        };
    }
    row.expected = total;
    row.expected_known = true;
    row.watermark_expires_at = Some(watermark_expires_at);
    BatchOutcome::Seeded {
        zero_assets: total == 0,
    }
}

/// Increments `done` for one per-asset ready event. Saturates at the
/// announced total so a late duplicate never pushes `done > expected`.
pub fn apply_ready(row: &mut JobProgress, count: u64) {
    row.done = row.done.saturating_add(count);
    if row.expected_known && row.done > row.expected {
        row.done = row.expected;
    }
}

/// Claims the threshold completion if it is due and unclaimed. Returns
/// `Some` exactly once per row.
pub fn claim_completion(row: &mut JobProgress, threshold_pct: u8) -> Option<CompletionSummary> {
    if row.completion_emitted || !row.expected_known {
        return None;
    }
    if row.done < required_for_completion(row.expected, threshold_pct) {
        return None;
    }
    row.completion_emitted = true;
    Some(summary(row))
}

/// Claims the watermark completion: the threshold was missed but the
/// waiting budget is spent. Returns `Some` exactly once per row.
pub fn claim_watermark_completion(row: &mut JobProgress) -> Option<CompletionSummary> {
    if row.completion_emitted || !row.expected_known {
        return None;
    }
    row.completion_emitted = true;
    Some(summary(row))
}

fn summary(row: &JobProgress) -> CompletionSummary {
    CompletionSummary {
        total_assets: row.expected,
        processed_assets: row.done,
        failed_assets: row.failed,
        has_partial_completion: row.has_partial_completion(),
    }
}
