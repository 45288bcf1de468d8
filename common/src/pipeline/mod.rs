// Pipeline runner: one linear, fail-fast pipeline per run
//
//   checkout → provision runtime → install dependencies → run entry point → upload artifact
//
// The first failing stage aborts the run; later stages are recorded as skipped.

pub mod stages;

use crate::artifact::ArtifactStore;
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::models::{PipelineRun, RunStatus, Stage, StageResult, StageStatus};
use crate::process::CommandRunner;
use crate::secret::{bound_env_vars, resolve_secrets, Secret, SecretMasker};
use crate::storage::RunStore;
use crate::telemetry::{self, FailureNotifier, LogFailureNotifier};
use crate::workspace::Workspace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Seam between the scheduler and the pipeline it triggers
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    fn pipeline_name(&self) -> &str;

    /// Run the pipeline for a scheduled instant; always yields a finished run
    async fn run_scheduled(&self, scheduled_for: DateTime<Utc>, expression: &str) -> PipelineRun;
}

/// Executes the configured pipeline
pub struct PipelineRunner {
    config: PipelineConfig,
    commands: Arc<dyn CommandRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<dyn RunStore>,
    notifier: Arc<dyn FailureNotifier>,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        commands: Arc<dyn CommandRunner>,
        artifacts: Arc<dyn ArtifactStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            config,
            commands,
            artifacts,
            runs,
            notifier: Arc::new(LogFailureNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run the pipeline now, out-of-band. Exactly one run per call.
    pub async fn dispatch_manual(&self) -> Result<PipelineRun, PipelineError> {
        if !self.config.trigger.manual {
            warn!(pipeline = %self.config.name, "Manual dispatch refused");
            return Err(PipelineError::ManualDispatchDisabled(
                self.config.name.clone(),
            ));
        }

        Ok(self.execute(PipelineRun::new_manual(&self.config.name)).await)
    }

    /// Drive a pending run through every stage and persist the outcome
    #[instrument(skip(self, run), fields(run_id = %run.id, pipeline = %run.pipeline, trigger = run.trigger_source.label()))]
    pub async fn execute(&self, mut run: PipelineRun) -> PipelineRun {
        let secrets = resolve_secrets(&self.config.secrets);
        let masker = SecretMasker::new(&secrets);

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.secret_bindings = secrets.iter().map(|s| s.name().to_string()).collect();
        self.persist(&run).await;

        info!("Pipeline run started");

        let outcome = self.run_stages(&mut run, &secrets, &masker).await;

        // Anything not reached is skipped
        for stage in Stage::ALL {
            if run.stage(stage).is_none() {
                run.stages.push(StageResult::skipped(stage));
            }
        }

        run.completed_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                run.status = RunStatus::Succeeded;
                info!(
                    artifact_files = run.artifact.as_ref().map(|a| a.files.len()).unwrap_or(0),
                    duration_seconds = run.duration_seconds(),
                    "Pipeline run succeeded"
                );
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
                error!(
                    stage = ?e.stage(),
                    reason = e.reason(),
                    error = %e,
                    "Pipeline run failed"
                );
            }
        }

        self.persist(&run).await;
        telemetry::record_run(&run);

        if run.status == RunStatus::Failed {
            if let Err(e) = self.notifier.notify_failure(&run).await {
                warn!(error = %e, "Failed to send failure notification");
            }
        }

        run
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        secrets: &[Secret],
        masker: &SecretMasker,
    ) -> Result<(), PipelineError> {
        let started = Utc::now();
        let checkout = Workspace::checkout(
            Path::new(&self.config.source_dir),
            Path::new(&self.config.workspace_root),
            run.id,
            &self.config.exclude,
        )
        .await;
        finish_stage(run, Stage::Checkout, started, &checkout, |ws| {
            Some(format!("{} files checked out", ws.files_copied()))
        });
        let workspace = checkout?;

        let result = self
            .run_in_workspace(run, workspace.path(), secrets, masker)
            .await;

        if self.config.keep_workspace {
            info!(workspace = %workspace.path().display(), "Keeping workspace");
        } else if let Err(e) = workspace.cleanup().await {
            warn!(error = %e, "Failed to remove workspace");
        }

        result
    }

    async fn run_in_workspace(
        &self,
        run: &mut PipelineRun,
        workspace: &Path,
        secrets: &[Secret],
        masker: &SecretMasker,
    ) -> Result<(), PipelineError> {
        let commands = self.commands.as_ref();
        let env_remove = bound_env_vars(&self.config.secrets);

        let started = Utc::now();
        let result = stages::provision_runtime(
            commands,
            &self.config.runtime,
            workspace,
            &env_remove,
            masker,
        )
        .await;
        finish_stage(run, Stage::ProvisionRuntime, started, &result, |version| {
            Some(format!("{} {}", self.config.runtime.program, version))
        });
        result?;

        let started = Utc::now();
        let result = stages::install_dependencies(
            commands,
            &self.config.dependencies,
            workspace,
            &env_remove,
            masker,
        )
        .await;
        finish_stage(run, Stage::InstallDependencies, started, &result, |summary| {
            Some(summary.clone())
        });
        result?;

        let started = Utc::now();
        let result = stages::run_entry_point(
            commands,
            &self.config,
            secrets,
            workspace,
            &env_remove,
            masker,
        )
        .await;
        run.exit_code = match &result {
            Ok(output) => output.exit_code,
            Err(PipelineError::EntryPointExecution { exit_code, .. }) => *exit_code,
            Err(_) => None,
        };
        finish_stage(run, Stage::RunEntryPoint, started, &result, |_| None);
        result?;

        let started = Utc::now();
        let result =
            stages::upload_artifact(self.artifacts.as_ref(), &self.config.artifact, run.id, workspace)
                .await;
        finish_stage(run, Stage::UploadArtifact, started, &result, |manifest| {
            Some(match manifest {
                Some(m) => format!("{} files uploaded as '{}'", m.files.len(), m.name),
                None => "no matching files".to_string(),
            })
        });
        run.artifact = result?;

        Ok(())
    }

    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.runs.save(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to persist run record");
        }
    }
}

#[async_trait]
impl PipelineExecutor for PipelineRunner {
    fn pipeline_name(&self) -> &str {
        &self.config.name
    }

    async fn run_scheduled(&self, scheduled_for: DateTime<Utc>, expression: &str) -> PipelineRun {
        self.execute(PipelineRun::new_scheduled(
            &self.config.name,
            scheduled_for,
            expression,
        ))
        .await
    }
}

fn finish_stage<T>(
    run: &mut PipelineRun,
    stage: Stage,
    started: DateTime<Utc>,
    result: &Result<T, PipelineError>,
    success_message: impl FnOnce(&T) -> Option<String>,
) {
    let completed = Utc::now();
    telemetry::record_stage_duration(
        stage,
        (completed - started).num_milliseconds() as f64 / 1000.0,
    );

    let (status, message) = match result {
        Ok(value) => (StageStatus::Succeeded, success_message(value)),
        Err(e) => (StageStatus::Failed, Some(e.to_string())),
    };

    run.stages.push(StageResult {
        stage,
        status,
        started_at: Some(started),
        completed_at: Some(completed),
        message,
    });
}
