use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Trigger Models
// ============================================================================

/// TriggerSource identifies what activated a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled {
        scheduled_for: DateTime<Utc>,
        expression: String,
    },
    Manual,
}

impl TriggerSource {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            TriggerSource::Scheduled { .. } => "scheduled",
            TriggerSource::Manual => "manual",
        }
    }
}

// ============================================================================
// Run Models
// ============================================================================

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Checkout,
    ProvisionRuntime,
    InstallDependencies,
    RunEntryPoint,
    UploadArtifact,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Checkout,
        Stage::ProvisionRuntime,
        Stage::InstallDependencies,
        Stage::RunEntryPoint,
        Stage::UploadArtifact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Checkout => "checkout",
            Stage::ProvisionRuntime => "provision_runtime",
            Stage::InstallDependencies => "install_dependencies",
            Stage::RunEntryPoint => "run_entry_point",
            Stage::UploadArtifact => "upload_artifact",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RunStatus represents the lifecycle state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// StageStatus represents the outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// StageResult records how one stage of a run ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageResult {
    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            started_at: None,
            completed_at: None,
            message: None,
        }
    }
}

/// PipelineRun represents a single execution instance of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger_source: TriggerSource,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    /// Names of environment variables bound from secrets; values are never stored
    #[serde(default)]
    pub secret_bindings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new pending run for a scheduled instant
    pub fn new_scheduled(pipeline: &str, scheduled_for: DateTime<Utc>, expression: &str) -> Self {
        Self::new(
            pipeline,
            TriggerSource::Scheduled {
                scheduled_for,
                expression: expression.to_string(),
            },
        )
    }

    /// Create a new pending run for a manual dispatch
    pub fn new_manual(pipeline: &str) -> Self {
        Self::new(pipeline, TriggerSource::Manual)
    }

    fn new(pipeline: &str, trigger_source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            trigger_source,
            status: RunStatus::Pending,
            stages: Vec::new(),
            secret_bindings: Vec::new(),
            exit_code: None,
            artifact: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Result recorded for a stage, if the run reached it
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Duration from start to completion in seconds
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

// ============================================================================
// Artifact Models
// ============================================================================

/// One file inside an uploaded artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub storage_key: String,
}

/// ArtifactManifest describes a named bundle of files persisted for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub run_id: Uuid,
    pub files: Vec<ArtifactFile>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArtifactManifest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_scheduled_run_is_pending() {
        let at = Utc::now();
        let run = PipelineRun::new_scheduled("weekly", at, "45 8 * * 4");
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.trigger_source.label(), "scheduled");
        assert!(run.stages.is_empty());
    }

    #[test]
    fn test_trigger_source_serialization() {
        let json = serde_json::to_value(TriggerSource::Manual).unwrap();
        assert_eq!(json, serde_json::json!({"type": "manual"}));
    }

    #[test]
    fn test_manifest_expiry() {
        let now = Utc::now();
        let manifest = ArtifactManifest {
            name: "crypto-report".to_string(),
            run_id: Uuid::new_v4(),
            files: vec![],
            created_at: now,
            expires_at: now + Duration::days(1),
        };
        assert!(!manifest.is_expired(now));
        assert!(manifest.is_expired(now + Duration::days(1)));
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ALL[0], Stage::Checkout);
        assert_eq!(Stage::ALL[4], Stage::UploadArtifact);
        assert_eq!(Stage::RunEntryPoint.to_string(), "run_entry_point");
    }
}
