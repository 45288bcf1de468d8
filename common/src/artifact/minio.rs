// MinIO artifact backend

use super::{file_entry, manifest_key, new_manifest, read_upload, ArtifactStore, MANIFEST_FILE};
use crate::errors::StorageError;
use crate::models::{ArtifactFile, ArtifactManifest};
use crate::storage::MinioClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Root prefix of every artifact object in the bucket
const ARTIFACT_PREFIX: &str = "artifacts/";

/// Stores artifacts in an S3-compatible bucket
#[derive(Clone, Debug)]
pub struct MinioArtifactStore {
    client: MinioClient,
}

impl MinioArtifactStore {
    pub fn new(client: MinioClient) -> Self {
        Self { client }
    }

    fn object_path(key: &str) -> String {
        format!("{}{}", ARTIFACT_PREFIX, key)
    }

    async fn load_manifest(&self, path: &str) -> Result<ArtifactManifest, StorageError> {
        let data = self.client.get_object(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[async_trait]
impl ArtifactStore for MinioArtifactStore {
    #[instrument(skip(self, files), fields(file_count = files.len()))]
    async fn upload(
        &self,
        run_id: Uuid,
        name: &str,
        files: &[PathBuf],
        retention: Duration,
    ) -> Result<ArtifactManifest, StorageError> {
        let mut entries: Vec<ArtifactFile> = Vec::with_capacity(files.len());
        for path in files {
            let (file_name, data) = read_upload(path).await?;
            let entry = file_entry(run_id, name, &file_name, &data);
            self.client
                .put_object(&Self::object_path(&entry.storage_key), &data)
                .await?;
            entries.push(entry);
        }

        let manifest = new_manifest(run_id, name, entries, retention);
        self.client
            .put_object(
                &Self::object_path(&manifest_key(run_id, name)),
                &serde_json::to_vec_pretty(&manifest)?,
            )
            .await?;

        info!(
            run_id = %run_id,
            artifact = %name,
            files = manifest.files.len(),
            "Artifact uploaded to MinIO"
        );
        Ok(manifest)
    }

    async fn manifest(
        &self,
        run_id: Uuid,
        name: &str,
    ) -> Result<Option<ArtifactManifest>, StorageError> {
        match self
            .load_manifest(&Self::object_path(&manifest_key(run_id, name)))
            .await
        {
            Ok(manifest) => Ok(Some(manifest)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn download(&self, file: &ArtifactFile) -> Result<Vec<u8>, StorageError> {
        self.client
            .get_object(&Self::object_path(&file.storage_key))
            .await
    }

    #[instrument(skip(self))]
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let manifests: Vec<String> = self
            .client
            .list_objects(ARTIFACT_PREFIX)
            .await?
            .into_iter()
            .filter(|key| key.ends_with(MANIFEST_FILE))
            .collect();

        let mut pruned = 0;
        for path in manifests {
            let manifest = match self.load_manifest(&path).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(path = %path, error = %e, "Unreadable manifest");
                    continue;
                }
            };
            if !manifest.is_expired(now) {
                continue;
            }

            for file in &manifest.files {
                // Gone already when an earlier prune stopped part way
                match self
                    .client
                    .delete_object(&Self::object_path(&file.storage_key))
                    .await
                {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            // Manifest last, so a partial prune is retried on the next pass
            self.client.delete_object(&path).await?;

            info!(run_id = %manifest.run_id, artifact = %manifest.name, "Expired artifact pruned");
            pruned += 1;
        }

        Ok(pruned)
    }
}
