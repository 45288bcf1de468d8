// Artifact collection and storage
//
// The upload stage matches a file-name glob against the workspace root and
// persists every match as one named artifact. Storage layout, shared by every
// backend:
//
//   {run_id}/{artifact_name}/{file_name}
//   {run_id}/{artifact_name}/manifest.json

pub mod filesystem;
pub mod minio;

pub use filesystem::FilesystemArtifactStore;
pub use minio::MinioArtifactStore;

use crate::errors::StorageError;
use crate::models::{ArtifactFile, ArtifactManifest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

/// ArtifactStore persists run outputs independently of the run's workspace
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload `files` as artifact `name` of `run_id`
    async fn upload(
        &self,
        run_id: Uuid,
        name: &str,
        files: &[PathBuf],
        retention: Duration,
    ) -> Result<ArtifactManifest, StorageError>;

    /// Load the manifest of an artifact, if it exists
    async fn manifest(
        &self,
        run_id: Uuid,
        name: &str,
    ) -> Result<Option<ArtifactManifest>, StorageError>;

    /// Read back the content of one artifact file
    async fn download(&self, file: &ArtifactFile) -> Result<Vec<u8>, StorageError>;

    /// Delete every artifact whose retention has passed; returns how many
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// File-name glob: `*` matches any run of characters, `?` exactly one
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    pattern: String,
    regex: Regex,
}

impl ArtifactPattern {
    pub fn new(pattern: &str) -> Result<Self, StorageError> {
        let mut regex_pattern = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => regex_pattern.push_str(".*"),
                '?' => regex_pattern.push('.'),
                other => regex_pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex_pattern.push('$');

        let regex = Regex::new(&regex_pattern).map_err(|e| {
            StorageError::FileSystemError(format!("Invalid artifact pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    /// Regular files directly inside `dir` whose names match, sorted by name
    ///
    /// A file named like the manifest is never collected, since its key
    /// would collide with the manifest written alongside the artifact.
    pub async fn collect(&self, dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut matches = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.matches(&name) {
                continue;
            }
            if name == MANIFEST_FILE {
                warn!(file = %name, "Skipping file that would overwrite the artifact manifest");
                continue;
            }
            if tokio::fs::metadata(entry.path()).await?.is_file() {
                matches.push(entry.path());
            }
        }

        matches.sort();
        Ok(matches)
    }
}

/// Storage key of one artifact file
pub fn artifact_key(run_id: Uuid, name: &str, file_name: &str) -> String {
    format!("{}/{}/{}", run_id, name, file_name)
}

/// Storage key of an artifact's manifest
pub fn manifest_key(run_id: Uuid, name: &str) -> String {
    artifact_key(run_id, name, MANIFEST_FILE)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// File name and content of a local file about to be uploaded
pub(crate) async fn read_upload(path: &Path) -> Result<(String, Vec<u8>), StorageError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StorageError::FileSystemError(format!("Invalid artifact file path: {}", path.display()))
        })?
        .to_string();
    let data = tokio::fs::read(path).await?;
    Ok((file_name, data))
}

/// Manifest entry for uploaded content
pub(crate) fn file_entry(run_id: Uuid, name: &str, file_name: &str, data: &[u8]) -> ArtifactFile {
    ArtifactFile {
        name: file_name.to_string(),
        size_bytes: data.len() as u64,
        sha256: sha256_hex(data),
        storage_key: artifact_key(run_id, name, file_name),
    }
}

pub(crate) fn new_manifest(
    run_id: Uuid,
    name: &str,
    files: Vec<ArtifactFile>,
    retention: Duration,
) -> ArtifactManifest {
    let created_at = Utc::now();
    ArtifactManifest {
        name: name.to_string(),
        run_id,
        files,
        created_at,
        expires_at: created_at + retention,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pattern_matches_report_names() {
        let pattern = ArtifactPattern::new("Crypto_Report_*.png").unwrap();
        assert!(pattern.matches("Crypto_Report_2024-01-01.png"));
        assert!(pattern.matches("Crypto_Report_20240104_0845.png"));
        assert!(pattern.matches("Crypto_Report_.png"));
        assert!(!pattern.matches("Crypto_Report_2024.jpg"));
        assert!(!pattern.matches("crypto_report_2024.png"));
        assert!(!pattern.matches("Crypto_Report_2024.png.bak"));
    }

    #[test]
    fn test_pattern_treats_regex_characters_literally() {
        let pattern = ArtifactPattern::new("report(?).txt").unwrap();
        assert!(pattern.matches("report(1).txt"));
        assert!(!pattern.matches("report(12).txt"));
        assert!(!pattern.matches("report(1)xtxt"));
    }

    #[tokio::test]
    async fn test_collect_is_non_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Crypto_Report_b.png"), "b").unwrap();
        std::fs::write(dir.path().join("Crypto_Report_a.png"), "a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("Crypto_Report_dir.png")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/Crypto_Report_c.png"), "c").unwrap();

        let pattern = ArtifactPattern::new("Crypto_Report_*.png").unwrap();
        let files = pattern.collect(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Crypto_Report_a.png", "Crypto_Report_b.png"]);
    }

    #[tokio::test]
    async fn test_collect_never_returns_manifest_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        std::fs::write(dir.path().join("report.png"), "png").unwrap();

        let pattern = ArtifactPattern::new("*").unwrap();
        let files = pattern.collect(dir.path()).await.unwrap();
        assert_eq!(files, vec![dir.path().join("report.png")]);
    }

    #[test]
    fn test_keys_and_digest() {
        let run_id = Uuid::nil();
        assert_eq!(
            artifact_key(run_id, "crypto-report", "a.png"),
            "00000000-0000-0000-0000-000000000000/crypto-report/a.png"
        );
        assert!(manifest_key(run_id, "crypto-report").ends_with("/crypto-report/manifest.json"));
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
