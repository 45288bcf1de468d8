// Bootstrap utilities shared by the scheduler and dispatch binaries

use crate::artifact::{ArtifactStore, FilesystemArtifactStore, MinioArtifactStore};
use crate::config::{Settings, StorageBackend};
use crate::errors::ScheduleError;
use crate::lock::InMemoryTriggerLock;
use crate::pipeline::PipelineRunner;
use crate::process::ProcessRunner;
use crate::schedule::{CronTrigger, ScheduleCursor};
use crate::scheduler::SchedulerEngine;
use crate::storage::{FileRunStore, MinioClient, RunStore};
use crate::telemetry;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Load and validate settings from `config_dir`
pub fn load_settings(config_dir: &str) -> Result<Settings> {
    let settings = Settings::load_from_path(config_dir).context("Failed to load configuration")?;
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Initialize logging, tracing and, when a port is configured, metrics
pub fn init_telemetry(settings: &Settings) -> Result<()> {
    let observability = &settings.observability;
    telemetry::init_logging(
        &observability.log_level,
        observability.tracing_endpoint.as_deref(),
    )?;

    if let Some(port) = observability.metrics_port {
        telemetry::init_metrics(port)?;
    }
    Ok(())
}

/// Initialize the artifact store for the configured backend
///
/// # Errors
/// Returns error if the MinIO backend is selected without settings or the
/// client cannot be created
#[tracing::instrument(skip(settings))]
pub async fn init_artifact_store(settings: &Settings) -> Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match settings.storage.backend {
        StorageBackend::Filesystem => {
            info!(path = %settings.storage.path, "Using filesystem artifact store");
            Arc::new(FilesystemArtifactStore::new(&settings.storage.path))
        }
        StorageBackend::Minio => {
            let minio = settings
                .storage
                .minio
                .as_ref()
                .context("storage.minio must be set for the minio backend")?;
            let client = MinioClient::new(minio)
                .await
                .context("Failed to initialize MinIO client")?;
            if let Err(e) = client.health_check().await {
                warn!(error = %e, "MinIO health check failed, uploads may fail");
            }
            info!(endpoint = %minio.endpoint, bucket = %minio.bucket, "Using MinIO artifact store");
            Arc::new(MinioArtifactStore::new(client))
        }
    };
    Ok(store)
}

/// Run record store under the pipeline's state directory
pub fn init_run_store(settings: &Settings) -> Arc<dyn RunStore> {
    Arc::new(FileRunStore::new(&settings.pipeline.state_dir))
}

/// Wire a pipeline runner backed by real processes
pub fn init_pipeline_runner(
    settings: &Settings,
    artifacts: Arc<dyn ArtifactStore>,
) -> PipelineRunner {
    PipelineRunner::new(
        settings.pipeline.clone(),
        Arc::new(ProcessRunner::new()),
        artifacts,
        init_run_store(settings),
    )
}

/// Build the scheduler engine; evaluation starts now, so past instants never fire
///
/// # Errors
/// Returns error if the trigger expression or timezones are invalid, or the
/// trigger will never fire again
pub fn init_scheduler_engine(
    settings: &Settings,
    runner: Arc<PipelineRunner>,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<SchedulerEngine> {
    let trigger_config = &settings.pipeline.trigger;
    let trigger = CronTrigger::new(&trigger_config.cron, trigger_config.timezone()?)
        .context("Invalid trigger")?;

    let now = Utc::now();
    if trigger.next_after(now).is_none() {
        return Err(ScheduleError::NoNextExecution {
            expression: trigger_config.cron.clone(),
        }
        .into());
    }

    Ok(SchedulerEngine::new(
        settings.scheduler.clone(),
        runner,
        ScheduleCursor::new(trigger, now),
        Arc::new(InMemoryTriggerLock::new()),
        artifacts,
        trigger_config.display_timezone()?,
    ))
}
