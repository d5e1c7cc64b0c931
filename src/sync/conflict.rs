//! Conflict arbitration for paths changed on both sides.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::sync::action::{ConflictResolution, SyncActionRequest};

/// Decides what happens to a request classified as a conflict.
///
/// Called once per conflicting path while the engine is otherwise idle. An
/// error abandons that path for this run.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, request: &SyncActionRequest) -> Result<ConflictResolution>;
}

/// Strategy for resolving file conflicts without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Use the side with the most recent modification time.
    LastWriteWins,
    /// Always prefer the local file.
    LocalWins,
    /// Always prefer the remote object.
    RemoteWins,
    /// Keep both files, renaming the local one.
    KeepBoth,
    /// Leave conflicting files alone (default).
    #[default]
    Skip,
}

impl ConflictStrategy {
    /// Get a human-readable description of the strategy.
    pub fn description(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "Use most recently modified file",
            Self::LocalWins => "Always use local",
            Self::RemoteWins => "Always use remote",
            Self::KeepBoth => "Keep both (rename local copy)",
            Self::Skip => "Skip conflicting files",
        }
    }

    /// Resolve `request` under this strategy.
    pub fn decide(&self, request: &SyncActionRequest) -> ConflictResolution {
        match self {
            Self::LastWriteWins => {
                match (&request.local, &request.remote) {
                    (Some(local), Some(remote)) => {
                        if local.last_modified >= remote.last_modified {
                            ConflictResolution::Upload
                        } else {
                            ConflictResolution::Download
                        }
                    }
                    // The surviving side was edited after the other was deleted
                    (Some(_), None) => ConflictResolution::Upload,
                    (None, Some(_)) => ConflictResolution::Download,
                    (None, None) => ConflictResolution::Skip,
                }
            }
            Self::LocalWins => ConflictResolution::Upload,
            Self::RemoteWins => ConflictResolution::Download,
            Self::KeepBoth => ConflictResolution::KeepBoth,
            Self::Skip => ConflictResolution::Skip,
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(Self::LastWriteWins),
            "local-wins" => Ok(Self::LocalWins),
            "remote-wins" => Ok(Self::RemoteWins),
            "keep-both" => Ok(Self::KeepBoth),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown conflict strategy '{}' (expected last-write-wins, local-wins, remote-wins, keep-both or skip)",
                other
            )),
        }
    }
}

/// Resolver applying a fixed [`ConflictStrategy`], for scheduled runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyResolver {
    strategy: ConflictStrategy,
}

impl PolicyResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }
}

#[async_trait]
impl ConflictResolver for PolicyResolver {
    async fn resolve(&self, request: &SyncActionRequest) -> Result<ConflictResolution> {
        Ok(self.strategy.decide(request))
    }
}

/// Name for the renamed local side of a keep-both resolution:
/// `report.pdf` becomes `report (conflict copy 2024-05-01 081500).pdf`.
pub fn conflict_copy_name(file_name: &str, stamp: DateTime<Local>) -> String {
    let stamp = stamp.format("%Y-%m-%d %H%M%S");
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());

    match path.extension() {
        Some(ext) => format!("{} (conflict copy {}).{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{} (conflict copy {})", stem, stamp),
    }
}

/// Pick a free conflict-copy path next to `original`, adding a counter if
/// the timestamped name is taken.
pub async fn conflict_copy_path(original: &Path, stamp: DateTime<Local>) -> Result<PathBuf> {
    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = conflict_copy_name(&file_name, stamp);
    let mut candidate = original.with_file_name(&base);

    let mut counter = 2;
    while tokio::fs::try_exists(&candidate)
        .await
        .with_context(|| format!("Failed to check {}", candidate.display()))?
    {
        let numbered = Path::new(&base);
        let stem = numbered
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match numbered.extension() {
            Some(ext) => format!("{} {}.{}", stem, counter, ext.to_string_lossy()),
            None => format!("{} {}", stem, counter),
        };
        candidate = original.with_file_name(name);
        counter += 1;
    }

    Ok(candidate)
}
