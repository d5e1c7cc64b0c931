//! Executes one classified sync action and keeps the snapshot in step.

use anyhow::{Context, Result};
use chrono::Local;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::fs::backend::{join_key, RemoteStorage};
use crate::fs::local::{local_path, LocalScanner};
use crate::fs::types::IdentityScope;
use crate::sync::action::{SyncAction, SyncActionKind, SyncActionRequest};
use crate::sync::conflict::conflict_copy_path;
use crate::sync::snapshot::{SnapshotEntry, SnapshotStore};

/// What an executed action left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedAction {
    pub kind: SyncActionKind,
    /// Fresh snapshot entry, `None` when the entry was removed.
    pub snapshot: Option<SnapshotEntry>,
    /// Where the local side of a keep-both resolution was moved.
    pub conflict_copy: Option<String>,
}

/// Performs actions against the local tree and the remote store.
///
/// Does not retry; a failed action leaves the snapshot untouched so the same
/// divergence is classified again on the next run.
pub struct ActionExecutor {
    remote: Arc<dyn RemoteStorage>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ActionExecutor {
    pub fn new(remote: Arc<dyn RemoteStorage>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { remote, snapshots }
    }

    pub async fn execute(
        &self,
        request: &SyncActionRequest,
        local_root: &Path,
        remote_prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<ExecutedAction> {
        let key = join_key(remote_prefix, &request.path);
        let local_file = local_path(local_root, &request.path);
        let kind = request.kind();
        debug!(path = %request.path, key = %key, ?kind, "executing action");

        let mut conflict_copy = None;

        match &request.action {
            SyncAction::Skip | SyncAction::Conflict { .. } => {
                return Err(SyncError::NotExecutable {
                    path: request.path.clone(),
                    kind,
                }
                .into());
            }
            SyncAction::Upload { .. } => {
                let accepted = self
                    .remote
                    .upload(&local_file, &key, &scope.role_tags(), None, cancel)
                    .await
                    .with_context(|| format!("Failed to upload {}", request.path))?;
                if !accepted {
                    return Err(SyncError::Transfer {
                        key,
                        reason: "remote rejected the upload".to_string(),
                    }
                    .into());
                }
            }
            SyncAction::Download { .. } => {
                self.download(&key, &local_file, cancel).await?;
            }
            SyncAction::DeleteLocal { .. } => {
                match tokio::fs::remove_file(&local_file).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        debug!(path = %request.path, "local file already gone");
                    }
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("Failed to delete file: {}", local_file.display())
                        });
                    }
                }
            }
            SyncAction::DeleteRemote { .. } => {
                self.remote
                    .delete(&key, cancel)
                    .await
                    .with_context(|| format!("Failed to delete remote {}", key))?;
            }
            SyncAction::KeepBoth { .. } => {
                let local_exists = tokio::fs::try_exists(&local_file)
                    .await
                    .with_context(|| format!("Failed to check {}", local_file.display()))?;
                if local_exists {
                    let copy = conflict_copy_path(&local_file, Local::now()).await?;
                    tokio::fs::rename(&local_file, &copy).await.with_context(|| {
                        format!("Failed to rename {} to {}", local_file.display(), copy.display())
                    })?;
                    info!(path = %request.path, copy = %copy.display(), "kept local conflict copy");
                    conflict_copy = Some(copy.to_string_lossy().into_owned());
                }
                self.download(&key, &local_file, cancel).await?;
            }
            SyncAction::PurgeSnapshot => {}
        }

        let snapshot = if request.action.removes_snapshot() {
            self.snapshots
                .delete(&request.path)
                .await
                .map_err(SyncError::Snapshot)?;
            None
        } else {
            Some(self.record(request, &local_file, key).await?)
        };

        Ok(ExecutedAction {
            kind,
            snapshot,
            conflict_copy,
        })
    }

    async fn download(&self, key: &str, local_file: &Path, cancel: &CancellationToken) -> Result<()> {
        let dir = local_file
            .parent()
            .with_context(|| format!("No parent directory for {}", local_file.display()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        self.remote
            .download(key, dir, None, cancel)
            .await
            .with_context(|| format!("Failed to download {}", key))
    }

    /// Write the snapshot entry from the file as it now sits on disk.
    async fn record(
        &self,
        request: &SyncActionRequest,
        local_file: &Path,
        key: String,
    ) -> Result<SnapshotEntry> {
        let node = LocalScanner::stat(local_file, request.path.clone())?;
        let mut entry = SnapshotEntry::from_node(&node, key);
        entry.version_id = match &request.action {
            SyncAction::Download { remote } | SyncAction::KeepBoth { remote, .. } => {
                remote.version.clone()
            }
            _ => None,
        };

        self.snapshots
            .save(&entry)
            .await
            .map_err(SyncError::Snapshot)?;
        Ok(entry)
    }
}
