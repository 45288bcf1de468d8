// Scheduler binary entry point
//
// Usage: scheduler [CONFIG_DIR]   (default: ./config)

use anyhow::Result;
use common::bootstrap;
use common::scheduler::Scheduler;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| "config".to_string());
    let settings = bootstrap::load_settings(&config_dir)?;
    bootstrap::init_telemetry(&settings)?;

    info!(
        pipeline = %settings.pipeline.name,
        cron = %settings.pipeline.trigger.cron,
        timezone = %settings.pipeline.trigger.timezone,
        config_dir = %config_dir,
        "Starting pipeline scheduler"
    );

    let artifacts = bootstrap::init_artifact_store(&settings).await?;
    let runner = Arc::new(bootstrap::init_pipeline_runner(&settings, artifacts.clone()));
    let scheduler = Arc::new(bootstrap::init_scheduler_engine(
        &settings, runner, artifacts,
    )?);

    // Ctrl+C stops polling; a run already in progress is allowed to finish
    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    if let Err(e) = scheduler.start().await {
        error!(error = %e, "Scheduler error");
        telemetry::shutdown_tracer();
        return Err(anyhow::anyhow!(e));
    }

    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}
