//! # Schema Registry
//!
//! Validates payloads at every publish and every consume. Two entry
//! points:
//!
//! - [`SchemaRegistry::parse`] takes a topic name (either alias form) and
//!   a raw JSON value — the ingress path for producers in other languages;
//! - [`SchemaRegistry::validate`] checks the range rules on an
//!   already-typed payload — the publish path for in-process workers.
//!
//! A validation fault is fatal and non-retriable: the message is routed to
//! the DLQ with reason `INVALID_EVENT_SCHEMA` and never acked as success.

use crate::payloads::EventPayload;
use crate::topics::Topic;
use serde_json::Value;
use thiserror::Error;

/// Schema validation faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The topic name resolves to nothing in either alias form.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The payload does not deserialize against the topic's schema.
    #[error("Malformed {topic} payload: {detail}")]
    Malformed { topic: &'static str, detail: String },

    /// A field is outside its allowed range.
    #[error("{topic}.{field} out of range: {detail}")]
    OutOfRange {
        topic: &'static str,
        field: &'static str,
        detail: String,
    },
}

/// Stateless validator over the topic set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    /// Resolves `name` (dotted or underscore form) and deserializes
    /// `value` against that topic's schema, then applies the range rules.
    pub fn parse(name: &str, value: Value) -> Result<EventPayload, SchemaError> {
        let topic = Topic::resolve(name).ok_or_else(|| SchemaError::UnknownTopic(name.into()))?;
        let payload = Self::deserialize(topic, value)?;
        Self::validate(&payload)?;
        Ok(payload)
    }

    fn deserialize(topic: Topic, value: Value) -> Result<EventPayload, SchemaError> {
        let malformed = |e: serde_json::Error| SchemaError::Malformed {
            topic: topic.routing_key(),
            detail: e.to_string(),
        };
        let payload = match topic {
            Topic::ProductsCollectRequest => {
                EventPayload::ProductsCollectRequest(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::VideosSearchRequest => {
                EventPayload::VideosSearchRequest(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::MatchRequest => {
                EventPayload::MatchRequest(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::ProductsImageReady => {
                EventPayload::ProductsImageReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::ProductsImagesReadyBatch => EventPayload::ProductsImagesReadyBatch(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::ProductsCollectionsCompleted => EventPayload::ProductsCollectionsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::VideosKeyframesReady => {
                EventPayload::VideosKeyframesReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::VideosKeyframesReadyBatch => EventPayload::VideosKeyframesReadyBatch(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::VideosCollectionsCompleted => EventPayload::VideosCollectionsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::ProductsImageMasked => {
                EventPayload::ProductsImageMasked(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::ProductsImagesMaskedBatch => EventPayload::ProductsImagesMaskedBatch(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::VideoKeyframesMasked => {
                EventPayload::VideoKeyframesMasked(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::VideoKeyframesMaskedBatch => EventPayload::VideoKeyframesMaskedBatch(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::ImageEmbeddingReady => {
                EventPayload::ImageEmbeddingReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::ImageEmbeddingsCompleted => EventPayload::ImageEmbeddingsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::VideoEmbeddingReady => {
                EventPayload::VideoEmbeddingReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::VideoEmbeddingsCompleted => EventPayload::VideoEmbeddingsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::ImageKeypointReady => {
                EventPayload::ImageKeypointReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::ImageKeypointsCompleted => EventPayload::ImageKeypointsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::VideoKeypointReady => {
                EventPayload::VideoKeypointReady(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::VideoKeypointsCompleted => EventPayload::VideoKeypointsCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::MatchResult => {
                EventPayload::MatchResult(serde_json::from_value(value).map_err(malformed)?)
            }
            Topic::MatchRequestCompleted => EventPayload::MatchRequestCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::EvidencesGenerationCompleted => EventPayload::EvidencesGenerationCompleted(
                serde_json::from_value(value).map_err(malformed)?,
            ),
            Topic::JobCompleted => {
                EventPayload::JobCompleted(serde_json::from_value(value).map_err(malformed)?)
            }
        };
        Ok(payload)
    }

    /// Applies the range rules of the topic schemas.
    pub fn validate(payload: &EventPayload) -> Result<(), SchemaError> {
        let topic = payload.topic().routing_key();
        match payload {
            EventPayload::ProductsCollectRequest(p) => {
                range_u32(topic, "top_amz", p.top_amz, 1, 100)?;
                range_u32(topic, "top_ebay", p.top_ebay, 1, 100)?;
                if p.queries.get("en").map_or(true, |q| q.is_empty()) {
                    return Err(SchemaError::OutOfRange {
                        topic,
                        field: "queries.en",
                        detail: "at least one English query is required".into(),
                    });
                }
            }
            EventPayload::VideosSearchRequest(p) => {
                range_u32(topic, "recency_days", p.recency_days, 1, 365)?;
                if p.platforms.is_empty() {
                    return Err(SchemaError::OutOfRange {
                        topic,
                        field: "platforms",
                        detail: "at least one platform is required".into(),
                    });
                }
            }
            EventPayload::MatchRequest(p) => {
                range_u32(topic, "top_k", p.top_k, 1, 100)?;
            }
            EventPayload::MatchResult(p) => {
                unit_interval(topic, "score", p.score)?;
                unit_interval(topic, "best_pair.score_pair", p.best_pair.score_pair)?;
                if !(p.ts >= 0.0) {
                    return Err(SchemaError::OutOfRange {
                        topic,
                        field: "ts",
                        detail: format!("{} < 0", p.ts),
                    });
                }
            }
            EventPayload::VideosKeyframesReady(p) => {
                if let Some(f) = p.frames.iter().find(|f| !(f.ts >= 0.0)) {
                    return Err(SchemaError::OutOfRange {
                        topic,
                        field: "frames.ts",
                        detail: format!("{} < 0", f.ts),
                    });
                }
            }
            // Batch totals are u64, non-negative by construction; bare
            // completions carry no ranged fields.
            _ => {}
        }
        Ok(())
    }
}

fn range_u32(
    topic: &'static str,
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), SchemaError> {
    if value < min || value > max {
        return Err(SchemaError::OutOfRange {
            topic,
            field,
            detail: format!("{value} not in [{min}, {max}]"),
        });
    }
    Ok(())
}

fn unit_interval(topic: &'static str, field: &'static str, value: f64) -> Result<(), SchemaError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(SchemaError::OutOfRange {
            topic,
            field,
            detail: format!("{value} not in [0, 1]"),
        });
    }
    Ok(())
}
