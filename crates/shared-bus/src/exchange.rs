//! # Topic Exchange
//!
//! In-process implementation of the `product_video_matching` topic
//! exchange. Each subscription declares its own `queue.<topic>` bound to
//! the routing key; deliveries are at-least-once with manual ack
//! semantics, bounded redelivery with exponential backoff, and a
//! dead-letter queue per consumer queue.
//!
//! Suitable for single-node operation and the test harness; distributed
//! deployments swap in a broker-backed implementation with the same
//! contract.

use crate::payloads::EventPayload;
use crate::publisher::{EventPublisher, PublishError};
use crate::registry::SchemaRegistry;
use crate::subscriber::{Delivery, EventHandler, SubscriptionHandle};
use crate::topics::Topic;
use crate::{DEFAULT_PREFETCH, DEFAULT_QUEUE_CAPACITY, MAX_DELIVERIES, REASON_MAX_DELIVERIES};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pvm_telemetry::{EVENTS_DEAD_LETTERED, EVENTS_FAILED};
use shared_types::envelope::{current_unix_secs, EventMetadata};
use shared_types::errors::HandlerError;
use shared_types::timeouts;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Tuning knobs for the exchange.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Messages buffered per queue before publishes block.
    pub queue_capacity: usize,
    /// Concurrent handler invocations per consumer.
    pub prefetch: usize,
    /// Deliveries before a message is dead-lettered.
    pub max_deliveries: u32,
    /// First redelivery delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Redelivery delay ceiling.
    pub backoff_cap: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            prefetch: DEFAULT_PREFETCH,
            max_deliveries: MAX_DELIVERIES,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

/// A message that exhausted its delivery budget or failed validation.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The DLQ this entry lives in, `queue.<topic>.dlq`.
    pub queue: String,
    /// The consumer whose handler rejected the message.
    pub consumer_tag: String,
    /// Reason code, e.g. `INVALID_EVENT_SCHEMA`.
    pub reason: String,
    /// Human-readable detail from the last failure.
    pub detail: String,
    /// The message, retained for investigation.
    pub delivery: Delivery,
    /// Unix seconds when the message was dead-lettered.
    pub dead_lettered_at: u64,
}

struct Binding {
    consumer_tag: String,
    tx: mpsc::Sender<Delivery>,
}

/// The in-process topic exchange.
pub struct TopicExchange {
    config: ExchangeConfig,
    bindings: RwLock<HashMap<Topic, Vec<Binding>>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    published: AtomicU64,
    dead_lettered: Arc<AtomicU64>,
}

impl TopicExchange {
    /// Exchange with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ExchangeConfig::default())
    }

    /// Exchange with explicit configuration (tests shrink the backoff).
    #[must_use]
    pub fn with_config(config: ExchangeConfig) -> Self {
        Self {
            config,
            bindings: RwLock::new(HashMap::new()),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            published: AtomicU64::new(0),
            dead_lettered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Declares `queue.<topic>` for `consumer_tag`, binds it to the
    /// routing key, and starts a consumer loop feeding `handler`.
    pub fn subscribe(
        &self,
        topic: Topic,
        consumer_tag: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionHandle {
        let consumer_tag = consumer_tag.into();
        let (tx, rx) = mpsc::channel::<Delivery>(self.config.queue_capacity);

        self.bindings.write().entry(topic).or_default().push(Binding {
            consumer_tag: consumer_tag.clone(),
            tx: tx.clone(),
        });

        debug!(topic = %topic, consumer = %consumer_tag, "Queue declared and bound");

        let ctx = Arc::new(ConsumerCtx {
            topic,
            consumer_tag: consumer_tag.clone(),
            redelivery_tx: tx,
            handler,
            config: self.config.clone(),
            dead_letters: Arc::clone(&self.dead_letters),
            dead_lettered: Arc::clone(&self.dead_lettered),
        });
        let task = tokio::spawn(consume_loop(rx, ctx));

        SubscriptionHandle {
            queue: topic.queue_name(),
            consumer_tag,
            task,
        }
    }

    /// Number of queues currently bound to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.bindings.read().get(&topic).map_or(0, Vec::len)
    }

    /// Snapshot of the dead letters in `queue.<topic>.dlq`.
    #[must_use]
    pub fn dead_letters(&self, topic: Topic) -> Vec<DeadLetter> {
        let dlq_name = topic.dlq_name();
        self.dead_letters
            .lock()
            .iter()
            .filter(|d| d.queue == dlq_name)
            .cloned()
            .collect()
    }

    /// Total messages dead-lettered across all queues.
    #[must_use]
    pub fn dead_letter_count(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

impl Default for TopicExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for TopicExchange {
    async fn publish(&self, payload: EventPayload) -> Result<usize, PublishError> {
        SchemaRegistry::validate(&payload)?;

        let topic = payload.topic();
        let metadata = EventMetadata::now(topic.routing_key(), Uuid::new_v4());

        // Snapshot the bindings so no lock is held across the sends.
        let targets: Vec<(String, mpsc::Sender<Delivery>)> = self
            .bindings
            .read()
            .get(&topic)
            .map(|bs| {
                bs.iter()
                    .map(|b| (b.consumer_tag.clone(), b.tx.clone()))
                    .collect()
            })
            .unwrap_or_default();

        self.published.fetch_add(1, Ordering::Relaxed);

        if targets.is_empty() {
            warn!(topic = %topic, "Event dropped (no bound queues)");
            return Ok(0);
        }

        let mut confirmed = 0usize;
        for (consumer_tag, tx) in &targets {
            let delivery = Delivery {
                metadata: metadata.clone(),
                payload: payload.clone(),
                delivery_count: 1,
            };
            match tokio::time::timeout(timeouts::PUBLISH, tx.send(delivery)).await {
                Ok(Ok(())) => confirmed += 1,
                Ok(Err(_)) => {
                    // Subscription shut down; the stale binding is benign.
                    debug!(topic = %topic, consumer = %consumer_tag, "Bound queue closed, skipping");
                }
                Err(_) => {
                    return Err(PublishError::Timeout {
                        topic: topic.routing_key(),
                    });
                }
            }
        }

        debug!(topic = %topic, queues = confirmed, "Event published");
        Ok(confirmed)
    }

    fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

struct ConsumerCtx {
    topic: Topic,
    consumer_tag: String,
    redelivery_tx: mpsc::Sender<Delivery>,
    handler: Arc<dyn EventHandler>,
    config: ExchangeConfig,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    dead_lettered: Arc<AtomicU64>,
}

impl ConsumerCtx {
    fn dead_letter(&self, reason: &str, detail: String, delivery: Delivery) {
        warn!(
            topic = %self.topic,
            consumer = %self.consumer_tag,
            reason,
            attempts = delivery.delivery_count,
            "Message dead-lettered"
        );
        EVENTS_DEAD_LETTERED.inc();
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead_letters.lock().push(DeadLetter {
            queue: self.topic.dlq_name(),
            consumer_tag: self.consumer_tag.clone(),
            reason: reason.to_string(),
            detail,
            delivery,
            dead_lettered_at: current_unix_secs(),
        });
    }
}

async fn consume_loop(mut rx: mpsc::Receiver<Delivery>, ctx: Arc<ConsumerCtx>) {
    // Bounded worker pool: at most `prefetch` in-flight handler calls.
    let permits = Arc::new(Semaphore::new(ctx.config.prefetch.max(1)));

    while let Some(delivery) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _permit = permit;
            process_delivery(&ctx, delivery).await;
        });
    }
    debug!(topic = %ctx.topic, consumer = %ctx.consumer_tag, "Consumer loop stopped");
}

async fn process_delivery(ctx: &ConsumerCtx, delivery: Delivery) {
    match ctx.handler.handle(delivery.clone()).await {
        Ok(()) => {
            // Ack: handler succeeded (and committed its ledger insert).
        }
        Err(HandlerError::Retriable(cause)) => {
            EVENTS_FAILED
                .with_label_values(&[ctx.topic.routing_key(), "retriable"])
                .inc();
            if delivery.delivery_count >= ctx.config.max_deliveries {
                ctx.dead_letter(REASON_MAX_DELIVERIES, cause, delivery);
            } else {
                let delay = backoff_delay(&ctx.config, delivery.delivery_count);
                debug!(
                    topic = %ctx.topic,
                    attempt = delivery.delivery_count,
                    delay_ms = delay.as_millis() as u64,
                    "Nack, scheduling redelivery"
                );
                let next = Delivery {
                    delivery_count: delivery.delivery_count + 1,
                    ..delivery
                };
                tokio::time::sleep(delay).await;
                // Subscription gone → the requeue target no longer exists.
                let _ = ctx.redelivery_tx.send(next).await;
            }
        }
        Err(HandlerError::Fatal { reason, detail }) => {
            EVENTS_FAILED
                .with_label_values(&[ctx.topic.routing_key(), "fatal"])
                .inc();
            ctx.dead_letter(reason, detail, delivery);
        }
    }
}

/// `base · 2^(attempt-1)`, capped. Attempt is the 1-based delivery count
/// of the failed delivery.
fn backoff_delay(config: &ExchangeConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = config.backoff_base.saturating_mul(1u32 << exp);
    delay.min(config.backoff_cap)
}
