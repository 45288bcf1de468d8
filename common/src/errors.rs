// Error handling framework
// Every failure surfaces as a typed error; binaries wrap them with anyhow.

use crate::models::Stage;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time available for '{expression}'")]
    NoNextExecution { expression: String },
}

/// Process execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Execution timeout after {0} seconds")]
    Timeout(u64),

    #[error("Failed to collect process output: {0}")]
    OutputFailed(String),
}

/// Pipeline failures, one variant per stage that can fail
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Source checkout failed: {0}")]
    SourceCheckout(String),

    #[error("Environment provisioning failed: {0}")]
    EnvironmentProvisioning(String),

    #[error("Dependency install failed (exit code {exit_code:?}): {details}")]
    DependencyInstall {
        exit_code: Option<i32>,
        details: String,
    },

    #[error("Entry point failed (exit code {exit_code:?}): {details}")]
    EntryPointExecution {
        exit_code: Option<i32>,
        details: String,
    },

    #[error("No files found matching '{pattern}' for artifact '{artifact}'")]
    ArtifactNotFound { artifact: String, pattern: String },

    #[error("Artifact upload failed: {0}")]
    ArtifactUpload(String),

    #[error("Manual dispatch is disabled for pipeline '{0}'")]
    ManualDispatchDisabled(String),
}

impl PipelineError {
    /// Stage at which this error aborts the pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::SourceCheckout(_) => Some(Stage::Checkout),
            PipelineError::EnvironmentProvisioning(_) => Some(Stage::ProvisionRuntime),
            PipelineError::DependencyInstall { .. } => Some(Stage::InstallDependencies),
            PipelineError::EntryPointExecution { .. } => Some(Stage::RunEntryPoint),
            PipelineError::ArtifactNotFound { .. } | PipelineError::ArtifactUpload(_) => {
                Some(Stage::UploadArtifact)
            }
            PipelineError::ManualDispatchDisabled(_) => None,
        }
    }

    /// Short machine-readable reason, used as a metrics label
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::SourceCheckout(_) => "source_checkout",
            PipelineError::EnvironmentProvisioning(_) => "environment_provisioning",
            PipelineError::DependencyInstall { .. } => "dependency_install",
            PipelineError::EntryPointExecution { .. } => "entry_point_execution",
            PipelineError::ArtifactNotFound { .. } => "artifact_not_found",
            PipelineError::ArtifactUpload(_) => "artifact_upload",
            PipelineError::ManualDispatchDisabled(_) => "manual_dispatch_disabled",
        }
    }
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("MinIO error: {0}")]
    MinioError(String),

    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(err.to_string())
        } else {
            StorageError::FileSystemError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<ScheduleError> for ValidationError {
    fn from(err: ScheduleError) -> Self {
        ValidationError::InvalidFieldValue {
            field: "pipeline.trigger".to_string(),
            reason: err.to_string(),
        }
    }
}
