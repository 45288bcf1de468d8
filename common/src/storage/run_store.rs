// Run record persistence
// Records are JSON documents at {state_dir}/runs/{run_id}.json

use crate::errors::StorageError;
use crate::models::PipelineRun;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

/// RunStore persists pipeline run records
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace a run record
    async fn save(&self, run: &PipelineRun) -> Result<(), StorageError>;

    /// Load a run record by id
    async fn load(&self, run_id: Uuid) -> Result<PipelineRun, StorageError>;

    /// All run records, newest first
    async fn list(&self) -> Result<Vec<PipelineRun>, StorageError>;
}

/// Filesystem run store
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("runs"),
        }
    }

    fn record_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id, status = run.status.as_str()))]
    async fn save(&self, run: &PipelineRun) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so readers never see a partial record
        let path = self.record_path(run.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(run)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Run record saved");
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<PipelineRun, StorageError> {
        let data = tokio::fs::read(self.record_path(run_id))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound(format!("run {}", run_id)),
                _ => StorageError::from(e),
            })?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn list(&self) -> Result<Vec<PipelineRun>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await?;
            runs.push(serde_json::from_slice::<PipelineRun>(&data)?);
        }

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}
