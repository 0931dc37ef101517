//! # Error Types
//!
//! The pipeline-wide error taxonomy:
//!
//! - **Transient** faults retry with backoff and eventually dead-letter;
//!   the job phase is not failed.
//! - **Schema violations** dead-letter immediately and never retry.
//! - **Idempotency conflicts** are silent acks, not errors.

use thiserror::Error;

/// Errors surfaced by the storage ports.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness or state precondition was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A storage round-trip exceeded its budget.
    #[error("Storage operation timed out: {operation}")]
    Timeout { operation: &'static str },
}

/// Outcome classification for event handlers.
///
/// The subscriber loop acks on `Ok`, redelivers with backoff on
/// `Retriable` (DLQ after the delivery limit), and dead-letters
/// immediately on `Fatal`.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Transient fault: broker hiccup, storage timeout, slow inference.
    #[error("Retriable handler error: {0}")]
    Retriable(String),

    /// Non-retriable fault, e.g. a schema violation. Dead-lettered with
    /// the given reason; never acked as success.
    #[error("Fatal handler error ({reason}): {detail}")]
    Fatal {
        /// DLQ reason code, e.g. `INVALID_EVENT_SCHEMA`.
        reason: &'static str,
        detail: String,
    },
}

impl HandlerError {
    /// Transient fault from any displayable source.
    #[must_use]
    pub fn retriable(source: impl std::fmt::Display) -> Self {
        Self::Retriable(source.to_string())
    }

    /// Non-retriable fault with a DLQ reason code.
    #[must_use]
    pub fn fatal(reason: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Fatal {
            reason,
            detail: detail.to_string(),
        }
    }

    /// Whether the subscriber loop should redeliver.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

impl From<StoreError> for HandlerError {
    /// Storage faults are transient from a handler's point of view:
    /// at-least-once delivery gives no ordering, so a row that is missing
    /// now may exist on redelivery.
    fn from(err: StoreError) -> Self {
        Self::Retriable(err.to_string())
    }
}

/// Errors surfaced by the job service operations.
#[derive(Debug, Clone, Error)]
pub enum JobServiceError {
    /// Delete refused: the job is still active and `force` was not set.
    #[error("Job {job_id} is still active (phase {phase}); delete requires force")]
    ActiveJob { job_id: String, phase: String },

    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Publishing a request event failed.
    #[error("Publish failed: {0}")]
    Publish(String),
}
