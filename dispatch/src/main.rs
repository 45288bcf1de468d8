// Manual dispatch entry point: runs the pipeline once, now
//
// Usage: dispatch [CONFIG_DIR]   (default: ./config)
// Exit status is 0 when the run succeeded and 1 otherwise.

use anyhow::{Context, Result};
use common::bootstrap;
use common::models::{PipelineRun, RunStatus};
use common::telemetry;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let result = dispatch().await;
    telemetry::shutdown_tracer();

    match result {
        Ok(run) if run.status == RunStatus::Succeeded => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Manual dispatch could not run");
            eprintln!("dispatch: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch() -> Result<PipelineRun> {
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| "config".to_string());
    let settings = bootstrap::load_settings(&config_dir)?;
    bootstrap::init_telemetry(&settings)?;

    info!(pipeline = %settings.pipeline.name, "Manual dispatch requested");

    let artifacts = bootstrap::init_artifact_store(&settings).await?;
    let runner = bootstrap::init_pipeline_runner(&settings, artifacts);
    let run = runner.dispatch_manual().await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&run).context("Failed to serialize run record")?
    );
    Ok(run)
}
