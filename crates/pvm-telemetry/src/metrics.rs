//! Prometheus metrics for the matching pipeline.
//!
//! Naming convention: `pvm_<worker>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BUS METRICS
    // =========================================================================

    /// Events handled successfully, by topic.
    pub static ref EVENTS_PROCESSED: CounterVec = CounterVec::new(
        Opts::new("pvm_bus_events_processed_total", "Events handled successfully"),
        &["topic"]
    ).expect("metric creation failed");

    /// Handler failures, by topic and kind (retriable/fatal).
    pub static ref EVENTS_FAILED: CounterVec = CounterVec::new(
        Opts::new("pvm_bus_events_failed_total", "Handler failures"),
        &["topic", "kind"]
    ).expect("metric creation failed");

    /// Messages moved to a dead-letter queue.
    pub static ref EVENTS_DEAD_LETTERED: Counter = Counter::new(
        "pvm_bus_events_dead_lettered_total",
        "Messages moved to a dead-letter queue"
    ).expect("metric creation failed");

    // =========================================================================
    // TRACKER METRICS
    // =========================================================================

    /// Stage completions emitted, by stage and partiality.
    pub static ref COMPLETIONS_EMITTED: CounterVec = CounterVec::new(
        Opts::new("pvm_tracker_completions_emitted_total", "Stage completions emitted"),
        &["stage", "partial"]
    ).expect("metric creation failed");

    // =========================================================================
    // MATCHER METRICS
    // =========================================================================

    /// Accepted (product, video) matches.
    pub static ref MATCHES_ACCEPTED: Counter = Counter::new(
        "pvm_matcher_matches_accepted_total",
        "Accepted product-video matches"
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSITION MANAGER METRICS
    // =========================================================================

    /// Phase transitions applied, by target phase.
    pub static ref PHASE_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("pvm_transition_phase_transitions_total", "Phase transitions applied"),
        &["to"]
    ).expect("metric creation failed");

    /// Jobs reaching `completed`.
    pub static ref JOBS_COMPLETED: Counter = Counter::new(
        "pvm_transition_jobs_completed_total",
        "Jobs that reached the completed phase"
    ).expect("metric creation failed");

    /// Jobs reaching `failed`.
    pub static ref JOBS_FAILED: Counter = Counter::new(
        "pvm_transition_jobs_failed_total",
        "Jobs that reached the failed phase"
    ).expect("metric creation failed");
}

/// Registers the metric set with the global registry. Idempotent: a
/// duplicate registration is ignored so tests can re-init freely.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PROCESSED.clone()),
        Box::new(EVENTS_FAILED.clone()),
        Box::new(EVENTS_DEAD_LETTERED.clone()),
        Box::new(COMPLETIONS_EMITTED.clone()),
        Box::new(MATCHES_ACCEPTED.clone()),
        Box::new(PHASE_TRANSITIONS.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(JOBS_FAILED.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Renders the registry in the Prometheus text exposition format.
#[must_use]
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
