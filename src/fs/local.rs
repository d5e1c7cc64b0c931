use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jwalk::WalkDir;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::fs::types::FileNode;
use crate::sync::exclude::ExcludePatterns;

/// Recursive scanner for the local side of a sync.
pub struct LocalScanner {
    excludes: ExcludePatterns,
}

impl LocalScanner {
    pub fn new(excludes: ExcludePatterns) -> Self {
        Self { excludes }
    }

    /// Walk `root` and collect every regular file, keyed by its slash-separated
    /// path relative to `root`.
    ///
    /// Any entry that cannot be read aborts the scan; classifying against a
    /// partial tree would turn unreadable files into deletions.
    pub fn scan(&self, root: &Path) -> Result<BTreeMap<String, FileNode>> {
        let meta = fs::metadata(root)
            .with_context(|| format!("Failed to read directory: {}", root.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("Not a directory: {}", root.display());
        }

        let mut nodes = BTreeMap::new();

        for entry in WalkDir::new(root).skip_hidden(false).follow_links(false).sort(true) {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let full_path = entry.path();
            let Some(path) = relative_slash_path(&full_path, root) else {
                continue;
            };
            if self.excludes.is_excluded(&path) {
                continue;
            }

            let node = Self::stat(&full_path, path)?;
            nodes.insert(node.path.clone(), node);
        }

        Ok(nodes)
    }

    /// Build a [`FileNode`] for one local file.
    pub fn stat(full_path: &Path, path: String) -> Result<FileNode> {
        let metadata = fs::metadata(full_path)
            .with_context(|| format!("Failed to stat {}", full_path.display()))?;
        let modified = metadata
            .modified()
            .with_context(|| format!("No modification time for {}", full_path.display()))?;

        let mut node = FileNode::file(path, metadata.len(), DateTime::<Utc>::from(modified));
        node.is_dir = metadata.is_dir();
        if node.is_dir {
            node.size = 0;
        }
        Ok(node)
    }
}

/// Convert `full` into a `/`-separated path relative to `root`.
pub fn relative_slash_path(full: &Path, root: &Path) -> Option<String> {
    let relative = full.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Resolve a slash-separated relative path under `root`.
pub fn local_path(root: &Path, path: &str) -> PathBuf {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}
