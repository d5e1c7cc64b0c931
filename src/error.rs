//! Error taxonomy for sync runs.
//!
//! Storage adapters report failures as `anyhow::Error` with context; the
//! engine wraps the ones that abort a run into [`SyncError`] so callers can
//! tell a failed scan from a failed listing.

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::action::SyncActionKind;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to scan local directory {path}: {source:#}")]
    LocalScan {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to list remote prefix '{prefix}': {source:#}")]
    RemoteListing {
        prefix: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Snapshot store error: {0:#}")]
    Snapshot(#[source] anyhow::Error),

    #[error("Transfer of '{key}' failed: {reason}")]
    Transfer { key: String, reason: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Action {kind:?} for '{path}' cannot be executed")]
    NotExecutable { path: String, kind: SyncActionKind },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether this error was caused by the cancellation token firing.
    pub fn is_cancelled(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<SyncError>(), Some(SyncError::Cancelled))
    }
}
