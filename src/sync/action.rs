//! Sync actions: the unit of work between classification and execution.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fs::types::FileNode;

/// Flat tag of a [`SyncAction`], for logging, statistics and progress text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncActionKind {
    Skip,
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    Conflict,
    KeepBoth,
    PurgeSnapshot,
}

impl fmt::Display for SyncActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Skip => "Skipping",
            Self::Upload => "Uploading",
            Self::Download => "Downloading",
            Self::DeleteLocal => "Deleting local",
            Self::DeleteRemote => "Deleting remote",
            Self::Conflict => "Resolving conflict",
            Self::KeepBoth => "Keeping both",
            Self::PurgeSnapshot => "Forgetting",
        };
        f.write_str(label)
    }
}

/// What to do with one path. Each variant carries the nodes it acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Skip,
    Upload { local: FileNode },
    Download { remote: FileNode },
    DeleteLocal { local: FileNode },
    DeleteRemote { remote: FileNode },
    /// Changed on both sides. Never executed; resolved first.
    Conflict {
        local: Option<FileNode>,
        remote: Option<FileNode>,
    },
    /// Keep the local file under a conflict-copy name and download the remote one.
    KeepBoth { local: FileNode, remote: FileNode },
    /// Gone from both sides since the last sync; only the snapshot entry is left.
    PurgeSnapshot,
}

impl SyncAction {
    pub fn kind(&self) -> SyncActionKind {
        match self {
            Self::Skip => SyncActionKind::Skip,
            Self::Upload { .. } => SyncActionKind::Upload,
            Self::Download { .. } => SyncActionKind::Download,
            Self::DeleteLocal { .. } => SyncActionKind::DeleteLocal,
            Self::DeleteRemote { .. } => SyncActionKind::DeleteRemote,
            Self::Conflict { .. } => SyncActionKind::Conflict,
            Self::KeepBoth { .. } => SyncActionKind::KeepBoth,
            Self::PurgeSnapshot => SyncActionKind::PurgeSnapshot,
        }
    }

    /// Check if this is a skip action.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// Whether success removes the snapshot entry instead of writing it.
    pub fn removes_snapshot(&self) -> bool {
        matches!(
            self,
            Self::DeleteLocal { .. } | Self::DeleteRemote { .. } | Self::PurgeSnapshot
        )
    }
}

/// Outcome chosen for a conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Leave both sides alone; the conflict reappears next run.
    Skip,
    /// Local side wins.
    Upload,
    /// Remote side wins.
    Download,
    /// Keep both variants.
    KeepBoth,
}

/// One path's classified action together with the listing-time nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncActionRequest {
    pub path: String,
    pub action: SyncAction,
    pub local: Option<FileNode>,
    pub remote: Option<FileNode>,
}

impl SyncActionRequest {
    pub fn new(
        path: impl Into<String>,
        action: SyncAction,
        local: Option<FileNode>,
        remote: Option<FileNode>,
    ) -> Self {
        Self {
            path: path.into(),
            action,
            local,
            remote,
        }
    }

    pub fn kind(&self) -> SyncActionKind {
        self.action.kind()
    }

    /// Map a resolution onto the sides that actually exist.
    ///
    /// "Local wins" with no local file propagates the local deletion, and
    /// keeping both with only one side present keeps the one that exists.
    pub fn resolved_action(&self, resolution: ConflictResolution) -> SyncAction {
        match (resolution, self.local.clone(), self.remote.clone()) {
            (ConflictResolution::Skip, _, _) | (_, None, None) => SyncAction::Skip,
            (ConflictResolution::Upload, Some(local), _) => SyncAction::Upload { local },
            (ConflictResolution::Upload, None, Some(remote)) => SyncAction::DeleteRemote { remote },
            (ConflictResolution::Download, _, Some(remote)) => SyncAction::Download { remote },
            (ConflictResolution::Download, Some(local), None) => SyncAction::DeleteLocal { local },
            (ConflictResolution::KeepBoth, Some(local), Some(remote)) => {
                SyncAction::KeepBoth { local, remote }
            }
            (ConflictResolution::KeepBoth, Some(local), None) => SyncAction::Upload { local },
            (ConflictResolution::KeepBoth, None, Some(remote)) => SyncAction::Download { remote },
        }
    }

    /// Rewrite this request's action from a conflict resolution.
    pub fn apply_resolution(&mut self, resolution: ConflictResolution) {
        self.action = self.resolved_action(resolution);
    }
}
