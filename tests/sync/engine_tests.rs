// Full sync passes against a temp directory and the in-memory store

use anyhow::Result;
use async_trait::async_trait;
use bucketsync::fs::types::IdentityScope;
use bucketsync::fs::types::FileNode;
use bucketsync::sync::action::{ConflictResolution, SyncAction, SyncActionRequest};
use bucketsync::sync::conflict::{ConflictResolver, ConflictStrategy, PolicyResolver};
use bucketsync::sync::engine::{SyncEngine, SyncProgress, STATUS_COMPLETE};
use bucketsync::sync::executor::ActionExecutor;
use bucketsync::sync::snapshot::{MemorySnapshotStore, SnapshotStore};
use chrono::Duration;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::support::{entry, mtime_of, t0, write_file, MockRemote};

struct Fixture {
    dir: TempDir,
    remote: Arc<MockRemote>,
    snapshots: Arc<MemorySnapshotStore>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            remote: Arc::new(MockRemote::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
        }
    }

    fn engine(&self) -> SyncEngine {
        SyncEngine::new(self.remote.clone(), self.snapshots.clone())
    }

    fn root(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Resolver returning a fixed answer and counting calls.
struct Fixed {
    resolution: ConflictResolution,
    calls: AtomicUsize,
}

impl Fixed {
    fn new(resolution: ConflictResolution) -> Self {
        Self {
            resolution,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConflictResolver for Fixed {
    async fn resolve(&self, _request: &SyncActionRequest) -> Result<ConflictResolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.resolution)
    }
}

struct Failing;

#[async_trait]
impl ConflictResolver for Failing {
    async fn resolve(&self, request: &SyncActionRequest) -> Result<ConflictResolution> {
        anyhow::bail!("no answer for {}", request.path)
    }
}

fn scope() -> IdentityScope {
    IdentityScope::unrestricted()
}

#[tokio::test]
async fn test_first_sync_uploads_local_file() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", b"0123456789", t0());

    let report = fx
        .engine()
        .sync(fx.root(), "team", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats.uploaded, 1);
    let object = fx.remote.get("team/a.txt").await.unwrap();
    assert_eq!(object.data, b"0123456789");

    let snapshot = fx.snapshots.get("a.txt").await.unwrap();
    assert_eq!(snapshot.size, 10);
    assert_eq!(snapshot.last_modified, t0());
    assert_eq!(snapshot.remote_key, "team/a.txt");
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", b"local", t0());
    write_file(fx.root(), "docs/b.txt", b"nested", t0());
    fx.remote.put("d.txt", b"remote only", t0()).await;

    let engine = fx.engine();
    let cancel = CancellationToken::new();
    let first = engine.sync(fx.root(), "", &scope(), None, &cancel).await.unwrap();
    assert_eq!(first.stats.uploaded, 2);
    assert_eq!(first.stats.downloaded, 1);
    assert_eq!(fs::read(fx.root().join("d.txt")).unwrap(), b"remote only");
    assert_eq!(mtime_of(&fx.root().join("d.txt")), t0());

    let second = engine.sync(fx.root(), "", &scope(), None, &cancel).await.unwrap();
    assert_eq!(second.total_items, 0);
    assert_eq!(second.stats.applied(), 0);
    assert_eq!(fx.snapshots.len().await, 3);
}

#[tokio::test]
async fn test_local_delete_removes_remote_and_snapshot() {
    let fx = Fixture::new();
    fx.remote.put("a.txt", b"0123456789", t0()).await;
    fx.snapshots.save(&entry("a.txt", 10, t0())).await.unwrap();

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.deleted_remote, 1);
    assert!(fx.remote.get("a.txt").await.is_none());
    assert!(fx.snapshots.get("a.txt").await.is_none());
}

#[tokio::test]
async fn test_remote_delete_removes_local_file() {
    let fx = Fixture::new();
    let path = write_file(fx.root(), "a.txt", b"0123456789", t0());
    fx.snapshots.save(&entry("a.txt", 10, t0())).await.unwrap();

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.deleted_local, 1);
    assert!(!path.exists());
    assert!(fx.snapshots.is_empty().await);
}

#[tokio::test]
async fn test_conflict_without_resolver_is_left_alone() {
    let fx = Fixture::new();
    let later = t0() + Duration::hours(1);
    write_file(fx.root(), "a.txt", &[b'l'; 20], later);
    fx.remote.put("a.txt", &[b'r'; 30], later).await;
    fx.snapshots.save(&entry("a.txt", 10, t0())).await.unwrap();

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(report.stats.conflicts_skipped, 1);
    assert_eq!(report.stats.applied(), 0);
    assert!(fx.remote.uploads.lock().await.is_empty());
    assert!(fx.remote.downloads.lock().await.is_empty());
    assert_eq!(fx.snapshots.get("a.txt").await, Some(entry("a.txt", 10, t0())));
    assert_eq!(fs::read(fx.root().join("a.txt")).unwrap(), vec![b'l'; 20]);
}

#[tokio::test]
async fn test_keep_both_renames_local_and_downloads_remote() {
    let fx = Fixture::new();
    let local_time = t0() + Duration::hours(1);
    let remote_time = t0() + Duration::hours(2);
    write_file(fx.root(), "a.txt", &[b'l'; 20], local_time);
    fx.remote.put("a.txt", &[b'r'; 30], remote_time).await;
    fx.snapshots.save(&entry("a.txt", 10, t0())).await.unwrap();

    let resolver = Fixed::new(ConflictResolution::KeepBoth);
    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), Some(&resolver), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.kept_both, 1);
    assert!(report.is_clean());

    assert_eq!(fs::read(fx.root().join("a.txt")).unwrap(), vec![b'r'; 30]);

    let copies: Vec<String> = fs::read_dir(fx.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("a (conflict copy ") && name.ends_with(".txt"))
        .collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(fs::read(fx.root().join(&copies[0])).unwrap(), vec![b'l'; 20]);

    let snapshot = fx.snapshots.get("a.txt").await.unwrap();
    assert_eq!(snapshot.size, 30);
    assert_eq!(snapshot.last_modified, remote_time);
}

#[tokio::test]
async fn test_keep_both_stops_when_local_lookup_fails() {
    let fx = Fixture::new();
    // A regular file where the parent directory should be.
    write_file(fx.root(), "plain.txt", b"file", t0());
    fx.remote.put("plain.txt/a.txt", &[b'r'; 30], t0()).await;

    let local = FileNode::file("plain.txt/a.txt", 20, t0());
    let remote = FileNode::file("plain.txt/a.txt", 30, t0());
    let request = SyncActionRequest::new(
        "plain.txt/a.txt",
        SyncAction::KeepBoth {
            local: local.clone(),
            remote: remote.clone(),
        },
        Some(local),
        Some(remote),
    );

    let executor = ActionExecutor::new(fx.remote.clone(), fx.snapshots.clone());
    let result = executor
        .execute(&request, fx.root(), "", &scope(), &CancellationToken::new())
        .await;

    assert!(result.is_err());
    assert!(fx.remote.downloads.lock().await.is_empty());
    assert_eq!(fs::read(fx.root().join("plain.txt")).unwrap(), b"file");
    assert!(fx.snapshots.is_empty().await);
}

#[tokio::test]
async fn test_policy_resolver_last_write_wins() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", &[b'l'; 20], t0() + Duration::hours(3));
    fx.remote.put("a.txt", &[b'r'; 30], t0() + Duration::hours(1)).await;

    let resolver = PolicyResolver::new(ConflictStrategy::LastWriteWins);
    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), Some(&resolver), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.conflicts, 1);
    assert_eq!(report.stats.uploaded, 1);
    assert_eq!(fx.remote.get("a.txt").await.unwrap().data, vec![b'l'; 20]);
}

#[tokio::test]
async fn test_resolver_failure_is_recorded_and_run_continues() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", &[b'l'; 20], t0() + Duration::hours(1));
    fx.remote.put("a.txt", &[b'r'; 30], t0() + Duration::hours(1)).await;
    fx.snapshots.save(&entry("a.txt", 10, t0())).await.unwrap();
    write_file(fx.root(), "b.txt", b"new", t0());

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), Some(&Failing), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.txt");
    assert_eq!(report.stats.uploaded, 1);
    assert_eq!(fx.snapshots.get("a.txt").await, Some(entry("a.txt", 10, t0())));
}

#[tokio::test]
async fn test_failed_transfer_does_not_stop_later_actions() {
    let fx = Fixture::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        write_file(fx.root(), name, name.as_bytes(), t0());
    }
    fx.remote.fail_on("b.txt").await;

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_items, 3);
    assert_eq!(report.stats.uploaded, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.failures[0].path, "b.txt");
    assert!(!report.is_clean());
    assert!(fx.snapshots.get("b.txt").await.is_none());
    assert_eq!(fx.remote.keys().await, vec!["a.txt", "c.txt"]);
}

#[tokio::test]
async fn test_both_deleted_only_purges_snapshot() {
    let fx = Fixture::new();
    fx.snapshots.save(&entry("gone.txt", 5, t0())).await.unwrap();

    let report = fx
        .engine()
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.purged, 1);
    assert!(fx.snapshots.is_empty().await);
    assert!(fx.remote.deletes.lock().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_run_processes_nothing() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", b"data", t0());

    let (tx, mut rx) = mpsc::channel(64);
    let engine = fx.engine().with_progress(tx);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.sync(fx.root(), "", &scope(), None, &cancel).await.unwrap();
    drop(engine);

    assert!(report.cancelled);
    assert_eq!(report.total_items, 1);
    assert_eq!(report.processed_items, 0);
    assert!(fx.remote.keys().await.is_empty());

    let mut events: Vec<SyncProgress> = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let last = events.last().unwrap();
    assert_eq!(last.status, STATUS_COMPLETE);
    assert_eq!(last.processed_items, 0);
}

#[tokio::test]
async fn test_progress_reports_each_action() {
    let fx = Fixture::new();
    write_file(fx.root(), "a.txt", b"a", t0());
    write_file(fx.root(), "b.txt", b"b", t0());

    let (tx, mut rx) = mpsc::channel(64);
    let engine = fx.engine().with_progress(tx);
    engine
        .sync(fx.root(), "", &scope(), None, &CancellationToken::new())
        .await
        .unwrap();
    drop(engine);

    let mut statuses = Vec::new();
    while let Some(event) = rx.recv().await {
        statuses.push((event.status, event.processed_items));
    }
    assert_eq!(
        statuses,
        vec![
            ("Scanning local".to_string(), 0),
            ("Scanning remote".to_string(), 0),
            ("Uploading a.txt".to_string(), 0),
            ("Uploading b.txt".to_string(), 1),
            ("Sync complete".to_string(), 2),
        ]
    );
}

#[tokio::test]
async fn test_scope_hides_other_roles_and_tags_uploads() {
    let fx = Fixture::new();
    fx.remote
        .put_with_roles("secret.txt", b"payroll", t0(), &["finance"])
        .await;
    fx.remote.put("public.txt", b"hello", t0()).await;
    write_file(fx.root(), "notes.txt", b"ops notes", t0());

    let ops = IdentityScope::new(["ops"]);
    let report = fx
        .engine()
        .sync(fx.root(), "", &ops, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.downloaded, 1);
    assert!(!fx.root().join("secret.txt").exists());
    assert!(fx.root().join("public.txt").exists());

    let uploaded = fx.remote.get("notes.txt").await.unwrap();
    assert!(uploaded.roles.contains("ops"));
}

#[tokio::test]
async fn test_excluded_paths_are_ignored_on_both_sides() {
    let fx = Fixture::new();
    write_file(fx.root(), ".git/config", b"[core]", t0());
    write_file(fx.root(), "keep.txt", b"keep", t0());
    fx.remote.put("scratch.tmp", b"temp", t0()).await;

    let plan = fx
        .engine()
        .plan(fx.root(), "", &scope(), &CancellationToken::new())
        .await
        .unwrap();

    let paths: Vec<&str> = plan.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["keep.txt"]);
}

#[tokio::test]
async fn test_missing_local_root_aborts_run() {
    let fx = Fixture::new();
    let missing = fx.root().join("does-not-exist");
    let result = fx
        .engine()
        .sync(&missing, "", &scope(), None, &CancellationToken::new())
        .await;
    assert!(matches!(
        result,
        Err(bucketsync::SyncError::LocalScan { .. })
    ));
}
