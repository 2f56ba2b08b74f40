//! Sensor Ingest Service - Main Entry Point

use anyhow::Context;
use api::{init_logging, run, Settings, DEFAULT_CONFIG_PATH};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let settings = match &path {
        Some(path) => Settings::load(path, true),
        None => Settings::load(DEFAULT_CONFIG_PATH, false),
    }
    .context("failed to load settings")?;

    init_logging(&settings.server.log_level, settings.server.log_json)?;
    info!("=== Sensor Ingest v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    run(settings, Some(metrics)).await
}
