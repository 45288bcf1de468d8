// Per-run workspaces: the source tree is copied into a fresh directory for
// every run so runs never share mutable state.

use crate::errors::{PipelineError, StorageError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// An isolated checkout of the source tree for one run
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    files_copied: usize,
}

impl Workspace {
    /// Copy `source` into `{workspace_root}/{run_id}`, skipping excluded names
    #[instrument(skip(exclude), fields(source = %source.display(), run_id = %run_id))]
    pub async fn checkout(
        source: &Path,
        workspace_root: &Path,
        run_id: Uuid,
        exclude: &[String],
    ) -> Result<Self, PipelineError> {
        let source = tokio::fs::canonicalize(source).await.map_err(|e| {
            PipelineError::SourceCheckout(format!(
                "source directory '{}' is not accessible: {}",
                source.display(),
                e
            ))
        })?;

        tokio::fs::create_dir_all(workspace_root)
            .await
            .map_err(|e| checkout_error("create workspace root", workspace_root, e))?;
        let workspace_root = tokio::fs::canonicalize(workspace_root)
            .await
            .map_err(|e| checkout_error("resolve workspace root", workspace_root, e))?;

        let path = workspace_root.join(run_id.to_string());
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| checkout_error("create workspace", &path, e))?;

        let files_copied = copy_tree(&source, &path, &workspace_root, exclude).await?;

        info!(
            workspace = %path.display(),
            files_copied,
            "Source tree checked out"
        );

        Ok(Self { path, files_copied })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn files_copied(&self) -> usize {
        self.files_copied
    }

    /// Remove the workspace directory
    #[instrument(skip(self), fields(workspace = %self.path.display()))]
    pub async fn cleanup(self) -> Result<(), StorageError> {
        tokio::fs::remove_dir_all(&self.path).await?;
        debug!("Workspace removed");
        Ok(())
    }
}

fn checkout_error(action: &str, path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::SourceCheckout(format!("failed to {} '{}': {}", action, path.display(), err))
}

async fn copy_tree(
    source: &Path,
    destination: &Path,
    workspace_root: &Path,
    exclude: &[String],
) -> Result<usize, PipelineError> {
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    let mut files_copied = 0;

    while let Some((from_dir, to_dir)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&from_dir)
            .await
            .map_err(|e| checkout_error("read directory", &from_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| checkout_error("read directory", &from_dir, e))?
        {
            let name = entry.file_name();
            if exclude.iter().any(|ex| name.to_str() == Some(ex.as_str())) {
                debug!(entry = %entry.path().display(), "Excluded from checkout");
                continue;
            }

            let from = entry.path();
            // Never copy the workspaces into themselves
            if from == workspace_root {
                continue;
            }
            let to = to_dir.join(&name);

            let file_type = entry
                .file_type()
                .await
                .map_err(|e| checkout_error("inspect", &from, e))?;

            if file_type.is_dir() {
                tokio::fs::create_dir(&to)
                    .await
                    .map_err(|e| checkout_error("create directory", &to, e))?;
                pending.push((from, to));
            } else if file_type.is_file() {
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|e| checkout_error("copy", &from, e))?;
                files_copied += 1;
            } else if file_type.is_symlink() {
                match tokio::fs::metadata(&from).await {
                    Ok(meta) if meta.is_file() => {
                        tokio::fs::copy(&from, &to)
                            .await
                            .map_err(|e| checkout_error("copy", &from, e))?;
                        files_copied += 1;
                    }
                    _ => warn!(entry = %from.display(), "Skipping symlink that is not a file"),
                }
            }
        }
    }

    Ok(files_copied)
}
