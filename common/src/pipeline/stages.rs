// Individual pipeline stages
//
// Each stage either returns its product or the PipelineError that aborts the
// run. Captured process output is logged with secrets masked. Every stage
// process has the secret-bound variables removed from its inherited
// environment; only the entry point gets the secrets injected back.

use crate::artifact::{ArtifactPattern, ArtifactStore};
use crate::config::{
    ArtifactConfig, DependenciesConfig, IfNoFilesFound, PipelineConfig, RuntimeConfig,
};
use crate::errors::{ExecutionError, PipelineError};
use crate::models::{ArtifactManifest, Stage};
use crate::process::{tail_lines, CommandOutput, CommandRunner, CommandSpec};
use crate::secret::{Secret, SecretMasker};
use crate::telemetry;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Time allowed for the runtime's version check
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Lines of stderr carried into failure messages
const FAILURE_TAIL_LINES: usize = 20;

/// Verify the runtime is installed at the pinned version; returns the version found
pub async fn provision_runtime(
    commands: &dyn CommandRunner,
    runtime: &RuntimeConfig,
    workspace: &Path,
    env_remove: &[String],
    masker: &SecretMasker,
) -> Result<String, PipelineError> {
    let spec = CommandSpec::new(&runtime.program, workspace)
        .args(runtime.version_args.clone())
        .env_remove(env_remove.iter().cloned());

    let output = commands.run(&spec, VERSION_CHECK_TIMEOUT).await.map_err(|e| {
        PipelineError::EnvironmentProvisioning(format!(
            "runtime version check '{}' failed: {}",
            spec.display(),
            e
        ))
    })?;
    log_output(Stage::ProvisionRuntime, &output, masker);

    if !output.success() {
        return Err(PipelineError::EnvironmentProvisioning(format!(
            "runtime version check '{}' exited with {:?}: {}",
            spec.display(),
            output.exit_code,
            failure_details(&output, masker)
        )));
    }

    let reported = extract_version(&output.stdout).or_else(|| extract_version(&output.stderr));

    match (runtime.version.as_deref(), reported) {
        (Some(pinned), Some(found)) if version_matches(&found, pinned) => {
            info!(runtime = %runtime.program, version = %found, "Runtime provisioned");
            Ok(found)
        }
        (Some(pinned), Some(found)) => Err(PipelineError::EnvironmentProvisioning(format!(
            "{} {} does not match pinned version {}",
            runtime.program, found, pinned
        ))),
        (Some(pinned), None) => Err(PipelineError::EnvironmentProvisioning(format!(
            "could not determine {} version (pinned {})",
            runtime.program, pinned
        ))),
        (None, found) => {
            let found = found.unwrap_or_else(|| "unknown".to_string());
            info!(runtime = %runtime.program, version = %found, "Runtime provisioned (unpinned)");
            Ok(found)
        }
    }
}

/// Install the declared packages; a no-op when none are declared
pub async fn install_dependencies(
    commands: &dyn CommandRunner,
    dependencies: &DependenciesConfig,
    workspace: &Path,
    env_remove: &[String],
    masker: &SecretMasker,
) -> Result<String, PipelineError> {
    if dependencies.packages.is_empty() {
        debug!("No dependencies declared");
        return Ok("no dependencies declared".to_string());
    }

    let Some((program, installer_args)) = dependencies.installer.split_first() else {
        return Err(PipelineError::DependencyInstall {
            exit_code: None,
            details: "no installer configured".to_string(),
        });
    };

    let spec = CommandSpec::new(program, workspace)
        .args(installer_args.iter().cloned())
        .args(dependencies.packages.iter().cloned())
        .env_remove(env_remove.iter().cloned());

    let output = commands
        .run(&spec, Duration::from_secs(dependencies.timeout_seconds))
        .await
        .map_err(|e| PipelineError::DependencyInstall {
            exit_code: None,
            details: format!("'{}': {}", spec.display(), e),
        })?;
    log_output(Stage::InstallDependencies, &output, masker);

    if !output.success() {
        return Err(PipelineError::DependencyInstall {
            exit_code: output.exit_code,
            details: failure_details(&output, masker),
        });
    }

    info!(packages = ?dependencies.packages, "Dependencies installed");
    Ok(format!("installed {}", dependencies.packages.join(", ")))
}

/// Run the entry point with the secrets injected into its environment
pub async fn run_entry_point(
    commands: &dyn CommandRunner,
    pipeline: &PipelineConfig,
    secrets: &[Secret],
    workspace: &Path,
    env_remove: &[String],
    masker: &SecretMasker,
) -> Result<CommandOutput, PipelineError> {
    let entry = &pipeline.entry_point;
    let program = entry.program.as_deref().unwrap_or(&pipeline.runtime.program);
    let spec = CommandSpec::new(program, workspace)
        .args(entry.args.iter().cloned())
        .env_remove(env_remove.iter().cloned())
        .secrets(secrets.to_vec());

    info!(
        command = %spec.display(),
        secrets = ?secrets.iter().map(Secret::name).collect::<Vec<_>>(),
        "Running entry point"
    );

    let output = commands
        .run(&spec, Duration::from_secs(entry.timeout_seconds))
        .await
        .map_err(|e| match e {
            ExecutionError::Timeout(seconds) => PipelineError::EntryPointExecution {
                exit_code: None,
                details: format!("timed out after {} seconds", seconds),
            },
            other => PipelineError::EntryPointExecution {
                exit_code: None,
                details: masker.mask(&other.to_string()),
            },
        })?;
    log_output(Stage::RunEntryPoint, &output, masker);

    if !output.success() {
        return Err(PipelineError::EntryPointExecution {
            exit_code: output.exit_code,
            details: failure_details(&output, masker),
        });
    }

    Ok(output)
}

/// Collect matching files from the workspace root and upload them as one artifact
pub async fn upload_artifact(
    store: &dyn ArtifactStore,
    artifact: &ArtifactConfig,
    run_id: Uuid,
    workspace: &Path,
) -> Result<Option<ArtifactManifest>, PipelineError> {
    let pattern = ArtifactPattern::new(&artifact.path)
        .map_err(|e| PipelineError::ArtifactUpload(e.to_string()))?;
    let files = pattern
        .collect(workspace)
        .await
        .map_err(|e| PipelineError::ArtifactUpload(e.to_string()))?;

    if files.is_empty() {
        return match artifact.if_no_files_found {
            IfNoFilesFound::Warn => {
                warn!(
                    artifact = %artifact.name,
                    pattern = %artifact.path,
                    "No files found matching the artifact pattern, nothing uploaded"
                );
                Ok(None)
            }
            IfNoFilesFound::Ignore => {
                debug!(artifact = %artifact.name, "No files to upload");
                Ok(None)
            }
            IfNoFilesFound::Error => Err(PipelineError::ArtifactNotFound {
                artifact: artifact.name.clone(),
                pattern: artifact.path.clone(),
            }),
        };
    }

    let retention = chrono::Duration::days(i64::from(artifact.retention_days));
    let manifest = store
        .upload(run_id, &artifact.name, &files, retention)
        .await
        .map_err(|e| PipelineError::ArtifactUpload(e.to_string()))?;

    telemetry::record_artifact_files(manifest.files.len());
    Ok(Some(manifest))
}

/// First version-like token in `text`, e.g. "3.11.4" from "Python 3.11.4"
pub fn extract_version(text: &str) -> Option<String> {
    text.split_whitespace().find_map(|token| {
        let version: String = token
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let version = version.trim_end_matches('.');
        if version.starts_with(|c: char| c.is_ascii_digit()) {
            Some(version.to_string())
        } else {
            None
        }
    })
}

/// "3" pins 3.x.y, "3.11" pins 3.11.y, and so on
pub fn version_matches(found: &str, pinned: &str) -> bool {
    found == pinned || found.starts_with(&format!("{}.", pinned))
}

fn failure_details(output: &CommandOutput, masker: &SecretMasker) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    masker.mask(&tail_lines(source, FAILURE_TAIL_LINES))
}

fn log_output(stage: Stage, output: &CommandOutput, masker: &SecretMasker) {
    for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let line = masker.mask(line);
            if stage == Stage::RunEntryPoint {
                info!(stage = %stage, stream, "{}", line);
            } else {
                debug!(stage = %stage, stream, "{}", line);
            }
        }
    }
}
