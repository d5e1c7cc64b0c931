// Classification of single paths from local, remote and snapshot state

use bucketsync::fs::types::FileNode;
use bucketsync::sync::action::{SyncAction, SyncActionKind};
use bucketsync::sync::reconcile::{classify, reconcile};
use bucketsync::sync::snapshot::SnapshotEntry;
use chrono::Duration;
use std::collections::BTreeMap;

use crate::support::{entry, t0};

fn node(size: u64) -> FileNode {
    FileNode::file("a.txt", size, t0())
}

#[test]
fn test_new_local_file_uploads() {
    let local = node(10);
    let action = classify(Some(&local), None, None);
    assert_eq!(action, SyncAction::Upload { local });
}

#[test]
fn test_identical_everywhere_skips() {
    let snapshot = entry("a.txt", 10, t0());
    let action = classify(Some(&node(10)), Some(&node(10)), Some(&snapshot));
    assert_eq!(action, SyncAction::Skip);
}

#[test]
fn test_mtime_within_tolerance_skips() {
    let snapshot = entry("a.txt", 10, t0());
    let local = FileNode::file("a.txt", 10, t0() + Duration::milliseconds(900));
    let remote = FileNode::file("a.txt", 10, t0() - Duration::milliseconds(1000));
    assert!(classify(Some(&local), Some(&remote), Some(&snapshot)).is_skip());

    let late = FileNode::file("a.txt", 10, t0() + Duration::milliseconds(1500));
    assert_eq!(
        classify(Some(&late), Some(&remote), Some(&snapshot)).kind(),
        SyncActionKind::Upload
    );
}

#[test]
fn test_local_change_uploads() {
    let snapshot = entry("a.txt", 10, t0());
    let action = classify(Some(&node(20)), Some(&node(10)), Some(&snapshot));
    assert_eq!(action, SyncAction::Upload { local: node(20) });
}

#[test]
fn test_local_delete_propagates_to_remote() {
    let snapshot = entry("a.txt", 10, t0());
    let action = classify(None, Some(&node(10)), Some(&snapshot));
    assert_eq!(action, SyncAction::DeleteRemote { remote: node(10) });
}

#[test]
fn test_remote_delete_propagates_to_local() {
    let snapshot = entry("a.txt", 10, t0());
    let action = classify(Some(&node(10)), None, Some(&snapshot));
    assert_eq!(action, SyncAction::DeleteLocal { local: node(10) });
}

#[test]
fn test_both_changed_is_conflict() {
    let snapshot = entry("a.txt", 10, t0());
    let action = classify(Some(&node(20)), Some(&node(30)), Some(&snapshot));
    assert_eq!(
        action,
        SyncAction::Conflict {
            local: Some(node(20)),
            remote: Some(node(30)),
        }
    );
}

#[test]
fn test_both_deleted_purges_snapshot() {
    let snapshot = entry("a.txt", 10, t0());
    assert_eq!(classify(None, None, Some(&snapshot)), SyncAction::PurgeSnapshot);
}

#[test]
fn test_reconcile_orders_union_of_paths() {
    let mut local = BTreeMap::new();
    local.insert("b.txt".to_string(), FileNode::file("b.txt", 1, t0()));
    local.insert("a/z.txt".to_string(), FileNode::file("a/z.txt", 1, t0()));

    let mut remote = BTreeMap::new();
    remote.insert("c.txt".to_string(), FileNode::file("c.txt", 2, t0()));

    let mut snapshot: BTreeMap<String, SnapshotEntry> = BTreeMap::new();
    snapshot.insert("gone.txt".to_string(), entry("gone.txt", 3, t0()));

    let requests = reconcile(&local, &remote, &snapshot);
    let summary: Vec<(&str, SyncActionKind)> = requests
        .iter()
        .map(|r| (r.path.as_str(), r.kind()))
        .collect();

    assert_eq!(
        summary,
        vec![
            ("a/z.txt", SyncActionKind::Upload),
            ("b.txt", SyncActionKind::Upload),
            ("c.txt", SyncActionKind::Download),
            ("gone.txt", SyncActionKind::PurgeSnapshot),
        ]
    );
}
