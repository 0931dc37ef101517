//! # Event Subscriber
//!
//! The consuming side of the event bus: deliveries, the handler contract,
//! and subscription handles.

use crate::payloads::EventPayload;
use async_trait::async_trait;
use shared_types::envelope::EventMetadata;
use shared_types::errors::HandlerError;
use tokio::task::JoinHandle;

/// A message as handed to a handler.
///
/// `delivery_count` starts at 1 and increments on every redelivery; the
/// consumer loop dead-letters the message once the count exceeds the
/// configured budget.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-injected metadata. Business logic must not depend on it.
    pub metadata: EventMetadata,
    /// The validated payload.
    pub payload: EventPayload,
    /// 1-based delivery attempt.
    pub delivery_count: u32,
}

/// The contract every consumer implements.
///
/// Handlers are invoked at-least-once and must be idempotent: check the
/// processed-event ledger before side effects, ack duplicates silently.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one delivery.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Retriable`] — the consumer loop redelivers with
    ///   backoff and dead-letters after the delivery budget.
    /// - [`HandlerError::Fatal`] — dead-lettered immediately.
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// Handle for an active subscription.
///
/// Dropping the handle does not stop consumption; call
/// [`SubscriptionHandle::shutdown`] for a deterministic stop.
pub struct SubscriptionHandle {
    pub(crate) queue: String,
    pub(crate) consumer_tag: String,
    pub(crate) task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// The queue this subscription consumes from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The consumer tag registered with the exchange.
    #[must_use]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Stops pulling new deliveries. Handler invocations already in
    /// flight run to completion.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
