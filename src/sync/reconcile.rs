//! Three-way change detection.
//!
//! Compares the local tree and the remote listing against the snapshot of the
//! last successful sync and classifies every path into a [`SyncAction`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::fs::types::FileNode;
use crate::sync::action::{SyncAction, SyncActionRequest};
use crate::sync::snapshot::SnapshotEntry;

/// Timestamps closer than this are equal (filesystem rounding).
pub const MTIME_TOLERANCE_MS: i64 = 1000;

/// Anything with a size and a modification time.
pub trait FileState {
    fn size(&self) -> u64;
    fn last_modified(&self) -> DateTime<Utc>;
}

impl FileState for FileNode {
    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

impl FileState for SnapshotEntry {
    fn size(&self) -> u64 {
        self.size
    }

    fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Whether two states match in size and in time within the tolerance.
pub fn same_state(a: &impl FileState, b: &impl FileState) -> bool {
    a.size() == b.size()
        && (a.last_modified() - b.last_modified()).num_milliseconds().abs() <= MTIME_TOLERANCE_MS
}

/// Has `current` diverged from the snapshot?
pub fn changed(current: Option<&FileNode>, snapshot: Option<&SnapshotEntry>) -> bool {
    match (current, snapshot) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(current), Some(snapshot)) => !same_state(current, snapshot),
    }
}

/// Classify a single path.
pub fn classify(
    local: Option<&FileNode>,
    remote: Option<&FileNode>,
    snapshot: Option<&SnapshotEntry>,
) -> SyncAction {
    let local_changed = changed(local, snapshot);
    let remote_changed = changed(remote, snapshot);

    match (local_changed, remote_changed, local, remote) {
        (false, false, _, _) => SyncAction::Skip,
        (_, _, None, None) => SyncAction::PurgeSnapshot,
        (true, false, Some(local), _) => SyncAction::Upload {
            local: local.clone(),
        },
        (true, false, None, Some(remote)) => SyncAction::DeleteRemote {
            remote: remote.clone(),
        },
        (false, true, _, Some(remote)) => SyncAction::Download {
            remote: remote.clone(),
        },
        (false, true, Some(local), None) => SyncAction::DeleteLocal {
            local: local.clone(),
        },
        (true, true, local, remote) => SyncAction::Conflict {
            local: local.cloned(),
            remote: remote.cloned(),
        },
    }
}

/// Classify every path in the union of the three maps, in path order.
///
/// The result includes `Skip` requests; the engine filters them.
pub fn reconcile(
    local: &BTreeMap<String, FileNode>,
    remote: &BTreeMap<String, FileNode>,
    snapshot: &BTreeMap<String, SnapshotEntry>,
) -> Vec<SyncActionRequest> {
    let paths: BTreeSet<&String> = local
        .keys()
        .chain(remote.keys())
        .chain(snapshot.keys())
        .collect();

    paths
        .into_iter()
        .map(|path| {
            let l = local.get(path);
            let r = remote.get(path);
            let action = classify(l, r, snapshot.get(path));
            SyncActionRequest::new(path.clone(), action, l.cloned(), r.cloned())
        })
        .collect()
}
