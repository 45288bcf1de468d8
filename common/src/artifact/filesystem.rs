// Filesystem artifact backend

use super::{file_entry, manifest_key, new_manifest, read_upload, ArtifactStore, MANIFEST_FILE};
use crate::errors::StorageError;
use crate::models::{ArtifactFile, ArtifactManifest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Stores artifacts below a root directory
#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_manifest(path: &Path) -> Result<ArtifactManifest, StorageError> {
        let data = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    #[instrument(skip(self, files), fields(root = %self.root.display(), file_count = files.len()))]
    async fn upload(
        &self,
        run_id: Uuid,
        name: &str,
        files: &[PathBuf],
        retention: Duration,
    ) -> Result<ArtifactManifest, StorageError> {
        let dir = self.root.join(run_id.to_string()).join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries: Vec<ArtifactFile> = Vec::with_capacity(files.len());
        for path in files {
            let (file_name, data) = read_upload(path).await?;
            tokio::fs::write(dir.join(&file_name), &data).await?;
            debug!(file = %file_name, size = data.len(), "Artifact file stored");
            entries.push(file_entry(run_id, name, &file_name, &data));
        }

        let manifest = new_manifest(run_id, name, entries, retention);
        tokio::fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?).await?;

        info!(
            run_id = %run_id,
            artifact = %name,
            files = manifest.files.len(),
            "Artifact uploaded"
        );
        Ok(manifest)
    }

    async fn manifest(
        &self,
        run_id: Uuid,
        name: &str,
    ) -> Result<Option<ArtifactManifest>, StorageError> {
        let path = self.root.join(manifest_key(run_id, name));
        match Self::read_manifest(&path).await {
            Ok(manifest) => Ok(Some(manifest)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download(&self, file: &ArtifactFile) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.root.join(&file.storage_key)).await?)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut runs = match tokio::fs::read_dir(&self.root).await {
            Ok(runs) => runs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut pruned = 0;
        while let Some(run_dir) = runs.next_entry().await? {
            if !run_dir.file_type().await?.is_dir() {
                continue;
            }

            let mut artifacts = tokio::fs::read_dir(run_dir.path()).await?;
            while let Some(artifact_dir) = artifacts.next_entry().await? {
                let manifest_path = artifact_dir.path().join(MANIFEST_FILE);
                let manifest = match Self::read_manifest(&manifest_path).await {
                    Ok(manifest) => manifest,
                    Err(StorageError::NotFound(_)) => continue,
                    Err(e) => {
                        warn!(path = %manifest_path.display(), error = %e, "Unreadable manifest");
                        continue;
                    }
                };

                if manifest.is_expired(now) {
                    tokio::fs::remove_dir_all(artifact_dir.path()).await?;
                    info!(run_id = %manifest.run_id, artifact = %manifest.name, "Expired artifact pruned");
                    pruned += 1;
                }
            }

            // Only succeeds once the run has no artifacts left
            let _ = tokio::fs::remove_dir(run_dir.path()).await;
        }

        Ok(pruned)
    }
}
