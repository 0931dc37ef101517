//! Pipeline entry point.

use pipeline_runtime::{Pipeline, PipelineConfig};
use pvm_telemetry::TelemetryConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = TelemetryConfig::from_env();
    pvm_telemetry::init_tracing(&telemetry)?;

    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::start(config)?;

    info!("Matching pipeline running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    pipeline.shutdown();
    Ok(())
}
