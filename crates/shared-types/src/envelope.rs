//! # Event Envelope
//!
//! The universal wrapper for messages on the event bus.
//!
//! ## Contract
//!
//! - The persisted part of an event is its payload: `event_id`, `job_id`,
//!   and topic-specific fields.
//! - `EventMetadata` is injected by the broker at publish time, is never
//!   persisted, and business logic MUST NOT depend on it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broker-injected metadata, carried alongside every delivered payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unix timestamp (seconds) at publish time.
    pub timestamp: u64,
    /// Correlates an event with the flow that produced it. Fresh per
    /// publish unless the publisher carries one through.
    pub correlation_id: Uuid,
    /// The routing key the event was published under.
    pub topic: String,
}

impl EventMetadata {
    /// Metadata for a publish happening now on `topic`.
    #[must_use]
    pub fn now(topic: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            timestamp: current_unix_secs(),
            correlation_id,
            topic: topic.into(),
        }
    }
}

/// An event as transmitted on the bus: metadata plus typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Broker-injected, not persisted.
    #[serde(rename = "_metadata")]
    pub metadata: EventMetadata,
    /// The validated payload.
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload with fresh metadata.
    #[must_use]
    pub fn wrap(topic: impl Into<String>, correlation_id: Uuid, payload: T) -> Self {
        Self {
            metadata: EventMetadata::now(topic, correlation_id),
            payload,
        }
    }
}

/// Current Unix timestamp in seconds.
#[must_use]
pub fn current_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
