//! # PVM Telemetry
//!
//! Structured logging and Prometheus metrics for the matching pipeline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pvm_telemetry::{TelemetryConfig, init_tracing};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_tracing(&config).expect("telemetry init");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PVM_SERVICE_NAME` | `pvm-pipeline` | Service name in log fields |
//! | `PVM_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `PVM_JSON_LOGS` | `false` | JSON log output |
//! | `PVM_METRICS_PORT` | `9100` | Prometheus scrape port |

mod config;
mod metrics;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, COMPLETIONS_EMITTED, EVENTS_DEAD_LETTERED, EVENTS_FAILED,
    EVENTS_PROCESSED, JOBS_COMPLETED, JOBS_FAILED, MATCHES_ACCEPTED, PHASE_TRANSITIONS,
};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A tracing subscriber is already installed.
    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),

    /// Metrics registration failed.
    #[error("Failed to register metrics: {0}")]
    MetricsInit(String),
}

/// Installs the global tracing subscriber and registers the metric set.
///
/// # Errors
///
/// [`TelemetryError::SubscriberInit`] when a subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    register_metrics().map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        metrics_port = config.metrics_port,
        "Telemetry initialized"
    );
    Ok(())
}
