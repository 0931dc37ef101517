//! # Shared Bus - Event Plane for the Matching Pipeline
//!
//! Topic exchange, schema registry, and delivery semantics shared by every
//! worker.
//!
//! ## Delivery Contract
//!
//! - At-least-once: a message is acked only after its handler returns
//!   success; handlers are idempotent via the processed-event ledger.
//! - Retriable handler errors redeliver with exponential backoff bounded
//!   to `[1s, 300s]`; after 5 deliveries the message moves to the queue's
//!   dead-letter queue.
//! - Schema violations dead-letter immediately with reason
//!   `INVALID_EVENT_SCHEMA` and are never retried.
//! - No ordering across publishers; handlers must be commutative on
//!   duplicates.
//!
//! ```text
//! ┌──────────────┐                        ┌──────────────────┐
//! │ Worker A     │   publish(topic, ev)   │ Worker B         │
//! │              │ ─────────┐             │                  │
//! └──────────────┘          ▼             └──────────────────┘
//!                 ┌───────────────────┐           ↑
//!                 │ product_video_    │  queue.<topic>
//!                 │ matching exchange │ ──────────┘
//!                 └───────────────────┘       │ 5 failures
//!                                             ▼
//!                                      queue.<topic>.dlq
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod exchange;
pub mod payloads;
pub mod publisher;
pub mod registry;
pub mod subscriber;
pub mod topics;

pub use exchange::{DeadLetter, ExchangeConfig, TopicExchange};
pub use payloads::{
    AssetReady, BestPair, EventPayload, JobCompleted, JobCompletion, KeyframeRef,
    MaskedKeyframeRef, MatchRequest, MatchRequestCompleted, MatchResult, ProductImageMasked,
    ProductImageReady, ProductImagesBatch, ProductsCollectRequest, StageCompleted,
    VideoKeyframesBatch, VideoKeyframesMasked, VideoKeyframesReady, VideosSearchRequest,
};
pub use publisher::{EventPublisher, PublishError};
pub use registry::{SchemaError, SchemaRegistry};
pub use subscriber::{Delivery, EventHandler, SubscriptionHandle};
pub use topics::Topic;

/// Name of the (durable) topic exchange.
pub const EXCHANGE_NAME: &str = "product_video_matching";

/// Messages buffered per queue before publish backpressure.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Maximum concurrent handler invocations per consumer.
pub const DEFAULT_PREFETCH: usize = 10;

/// Deliveries before a message is dead-lettered.
pub const MAX_DELIVERIES: u32 = 5;

/// DLQ reason for payloads that fail validation.
pub const REASON_INVALID_SCHEMA: &str = "INVALID_EVENT_SCHEMA";

/// DLQ reason for messages that exhausted their delivery budget.
pub const REASON_MAX_DELIVERIES: &str = "MAX_DELIVERIES_EXCEEDED";
