//! # Event Publisher
//!
//! The publishing side of the event bus.

use crate::registry::SchemaError;
use crate::payloads::EventPayload;
use async_trait::async_trait;
use thiserror::Error;

/// Publish failures.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The payload failed schema validation; nothing was published.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A bound queue did not confirm within the publish budget.
    #[error("Publish to {topic} timed out")]
    Timeout { topic: &'static str },
}

/// Trait for publishing events to the bus.
///
/// Every publish validates the payload against the schema registry and
/// injects fresh broker metadata. The call returns only once every bound
/// queue has confirmed the enqueue (publisher confirms).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event under its topic's routing key.
    ///
    /// # Returns
    ///
    /// The number of queues that received the event.
    ///
    /// # Errors
    ///
    /// [`PublishError::Schema`] when validation fails (the fault is
    /// non-retriable), [`PublishError::Timeout`] when a queue does not
    /// confirm in time (retriable).
    async fn publish(&self, payload: EventPayload) -> Result<usize, PublishError>;

    /// Total events published so far.
    fn events_published(&self) -> u64;
}
