//! Sync engine for bidirectional local/remote synchronization.
//!
//! One call to [`SyncEngine::sync`] is a full reconciliation pass: scan the
//! local tree, list the remote prefix, load the snapshot, classify every path
//! and execute the resulting actions one at a time.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::fs::backend::RemoteStorage;
use crate::fs::local::LocalScanner;
use crate::fs::types::{FileNode, IdentityScope};
use crate::sync::action::{ConflictResolution, SyncActionKind, SyncActionRequest};
use crate::sync::conflict::ConflictResolver;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::executor::ActionExecutor;
use crate::sync::reconcile::reconcile;
use crate::sync::snapshot::{SnapshotEntry, SnapshotStore};

pub const STATUS_SCANNING_LOCAL: &str = "Scanning local";
pub const STATUS_SCANNING_REMOTE: &str = "Scanning remote";
pub const STATUS_COMPLETE: &str = "Sync complete";

/// Progress update for sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub status: String,
    pub total_items: usize,
    pub processed_items: usize,
}

impl SyncProgress {
    pub fn new(status: impl Into<String>, total_items: usize, processed_items: usize) -> Self {
        Self {
            status: status.into(),
            total_items,
            processed_items,
        }
    }

    /// Get progress as a percentage (0.0 - 100.0).
    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.processed_items as f64 / self.total_items as f64 * 100.0
    }
}

/// Sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub local_files: usize,
    pub remote_files: usize,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub kept_both: usize,
    pub purged: usize,
    /// Conflicts detected, whatever their resolution.
    pub conflicts: usize,
    /// Conflicts resolved (or defaulted) to skip.
    pub conflicts_skipped: usize,
    pub failed: usize,
}

impl SyncStats {
    fn record(&mut self, kind: SyncActionKind) {
        match kind {
            SyncActionKind::Upload => self.uploaded += 1,
            SyncActionKind::Download => self.downloaded += 1,
            SyncActionKind::DeleteLocal => self.deleted_local += 1,
            SyncActionKind::DeleteRemote => self.deleted_remote += 1,
            SyncActionKind::KeepBoth => self.kept_both += 1,
            SyncActionKind::PurgeSnapshot => self.purged += 1,
            SyncActionKind::Skip => self.conflicts_skipped += 1,
            SyncActionKind::Conflict => {}
        }
    }

    /// Actions that changed something on either side.
    pub fn applied(&self) -> usize {
        self.uploaded + self.downloaded + self.deleted_local + self.deleted_remote + self.kept_both
    }
}

/// A per-path failure that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub path: String,
    pub kind: SyncActionKind,
    pub message: String,
}

/// Result of a sync operation.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub stats: SyncStats,
    pub failures: Vec<SyncFailure>,
    /// Non-skip requests classified this run.
    pub total_items: usize,
    /// Requests taken from the queue before the run ended.
    pub processed_items: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Sync engine for orchestrating sync operations.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStorage>,
    snapshots: Arc<dyn SnapshotStore>,
    executor: ActionExecutor,
    excludes: ExcludePatterns,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(remote: Arc<dyn RemoteStorage>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        let executor = ActionExecutor::new(remote.clone(), snapshots.clone());
        Self {
            remote,
            snapshots,
            executor,
            excludes: ExcludePatterns::with_defaults(),
            progress_tx: None,
        }
    }

    /// Replace the exclude patterns applied to both sides.
    pub fn with_excludes(mut self, excludes: ExcludePatterns) -> Self {
        self.excludes = excludes;
        self
    }

    /// Report progress on `progress_tx`.
    pub fn with_progress(mut self, progress_tx: mpsc::Sender<SyncProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    /// Send a progress update.
    async fn send_progress(&self, progress: SyncProgress) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(progress).await;
        }
    }

    /// Classify without executing anything (dry run).
    pub async fn plan(
        &self,
        local_root: &Path,
        remote_prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncActionRequest>> {
        let (requests, _) = self.classify(local_root, remote_prefix, scope, cancel).await?;
        Ok(requests)
    }

    /// Perform a full sync pass.
    ///
    /// Scan and listing failures abort the run before anything is executed.
    /// Failures of individual actions are logged and reported, never raised.
    pub async fn sync(
        &self,
        local_root: &Path,
        remote_prefix: &str,
        scope: &IdentityScope,
        resolver: Option<&dyn ConflictResolver>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let (requests, mut stats) =
            match self.classify(local_root, remote_prefix, scope, cancel).await {
                Ok(classified) => classified,
                Err(SyncError::Cancelled) => {
                    info!("sync cancelled while scanning");
                    self.send_progress(SyncProgress::new(STATUS_COMPLETE, 0, 0)).await;
                    return Ok(SyncReport {
                        cancelled: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                        ..SyncReport::default()
                    });
                }
                Err(err) => return Err(err),
            };

        let total = requests.len();
        let mut report = SyncReport {
            total_items: total,
            ..SyncReport::default()
        };
        info!(total, local = %local_root.display(), prefix = remote_prefix, "executing sync actions");

        for mut request in requests {
            if cancel.is_cancelled() {
                info!(processed = report.processed_items, total, "sync cancelled");
                report.cancelled = true;
                break;
            }

            self.send_progress(SyncProgress::new(
                format!("{} {}", request.kind(), request.path),
                total,
                report.processed_items,
            ))
            .await;

            if request.kind() == SyncActionKind::Conflict {
                stats.conflicts += 1;
            }

            match self
                .process(&mut request, local_root, remote_prefix, scope, resolver, cancel)
                .await
            {
                Ok(kind) => stats.record(kind),
                Err(err) => {
                    if SyncError::is_cancelled(&err) {
                        info!(path = %request.path, "transfer interrupted by cancellation");
                    } else {
                        warn!(path = %request.path, kind = ?request.kind(), "sync action failed: {:#}", err);
                    }
                    stats.failed += 1;
                    report.failures.push(SyncFailure {
                        path: request.path.clone(),
                        kind: request.kind(),
                        message: format!("{:#}", err),
                    });
                }
            }

            report.processed_items += 1;
        }

        self.send_progress(SyncProgress::new(STATUS_COMPLETE, total, report.processed_items))
            .await;

        report.stats = stats;
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            applied = report.stats.applied(),
            failed = report.stats.failed,
            duration_ms = report.duration_ms,
            "sync complete"
        );
        Ok(report)
    }

    /// Resolve (if needed) and execute one request.
    async fn process(
        &self,
        request: &mut SyncActionRequest,
        local_root: &Path,
        remote_prefix: &str,
        scope: &IdentityScope,
        resolver: Option<&dyn ConflictResolver>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncActionKind> {
        if request.kind() == SyncActionKind::Conflict {
            let resolution = match resolver {
                Some(resolver) => resolver.resolve(request).await?,
                None => ConflictResolution::Skip,
            };
            debug!(path = %request.path, ?resolution, "conflict resolved");
            request.apply_resolution(resolution);
        }

        if request.action.is_skip() {
            return Ok(SyncActionKind::Skip);
        }

        let executed = self
            .executor
            .execute(request, local_root, remote_prefix, scope, cancel)
            .await?;
        Ok(executed.kind)
    }

    /// Scan both sides, load the snapshot and classify. Returns the non-skip
    /// requests in path order plus the scan counts.
    async fn classify(
        &self,
        local_root: &Path,
        remote_prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<(Vec<SyncActionRequest>, SyncStats)> {
        self.send_progress(SyncProgress::new(STATUS_SCANNING_LOCAL, 0, 0)).await;
        let local = self.scan_local(local_root).await?;

        self.send_progress(SyncProgress::new(STATUS_SCANNING_REMOTE, 0, 0)).await;
        let remote = self.list_remote(remote_prefix, scope, cancel).await?;

        let snapshot: BTreeMap<String, SnapshotEntry> = self
            .snapshots
            .list_all()
            .await
            .map_err(SyncError::Snapshot)?
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();

        let stats = SyncStats {
            local_files: local.len(),
            remote_files: remote.len(),
            ..SyncStats::default()
        };

        let requests: Vec<SyncActionRequest> = reconcile(&local, &remote, &snapshot)
            .into_iter()
            .filter(|request| !request.action.is_skip())
            .collect();

        info!(
            local = stats.local_files,
            remote = stats.remote_files,
            snapshot = snapshot.len(),
            actions = requests.len(),
            at = %Utc::now(),
            "reconciled"
        );
        Ok((requests, stats))
    }

    async fn scan_local(&self, local_root: &Path) -> Result<BTreeMap<String, FileNode>> {
        let root: PathBuf = local_root.to_path_buf();
        let scanner = LocalScanner::new(self.excludes.clone());
        let scanned = tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result);

        scanned.map_err(|source| SyncError::LocalScan {
            path: local_root.to_path_buf(),
            source,
        })
    }

    async fn list_remote(
        &self,
        remote_prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, FileNode>> {
        let nodes = self
            .remote
            .list(remote_prefix, scope, cancel)
            .await
            .map_err(|source| {
                if SyncError::is_cancelled(&source) {
                    SyncError::Cancelled
                } else {
                    SyncError::RemoteListing {
                        prefix: remote_prefix.to_string(),
                        source,
                    }
                }
            })?;

        Ok(nodes
            .into_iter()
            .filter(|node| !node.is_dir)
            .filter(|node| scope.can_see(node))
            .filter(|node| !self.excludes.is_excluded(&node.path))
            .map(|node| (node.path.clone(), node))
            .collect())
    }
}
