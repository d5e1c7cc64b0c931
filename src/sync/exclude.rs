//! Glob excludes applied to the local scan and the remote listing alike.
//!
//! A pattern matches either the whole relative path or any single segment of
//! it, so `node_modules` hides that directory at every depth.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Suffix of in-flight downloads. Always excluded.
pub const PARTIAL_SUFFIX: &str = ".bucketsync-partial";

/// Suffix of metadata sidecar objects. Always excluded.
pub const METADATA_SUFFIX: &str = ".bucketsync-meta";

/// Patterns every sync starts with.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.swp",
    "*~",
    "*.tmp",
];

#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    set: GlobSet,
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// No patterns besides the partial-download and sidecar suffixes.
    pub fn new() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let patterns = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        match Self::compile(patterns) {
            Ok(excludes) => excludes,
            // Built-in patterns are valid globs.
            Err(_) => Self::new(),
        }
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut excludes = Self::new();
        for pattern in patterns {
            excludes.add_pattern(pattern.as_ref())?;
        }
        Ok(excludes)
    }

    /// Add `pattern` unless it is already present.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<()> {
        if self.patterns.iter().any(|p| p == pattern) {
            return Ok(());
        }
        let mut patterns = self.patterns.clone();
        patterns.push(pattern.to_string());
        *self = Self::compile(patterns)?;
        Ok(())
    }

    fn compile(patterns: Vec<String>) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(
                Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?,
            );
        }
        Ok(Self {
            set: builder.build()?,
            patterns,
        })
    }

    /// Whether the slash-separated relative `path` is excluded.
    pub fn is_excluded(&self, path: &str) -> bool {
        path.ends_with(PARTIAL_SUFFIX)
            || path.ends_with(METADATA_SUFFIX)
            || self.set.is_match(path)
            || path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .any(|segment| self.set.is_match(segment))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn merge(&mut self, other: &ExcludePatterns) -> Result<()> {
        for pattern in &other.patterns {
            self.add_pattern(pattern)?;
        }
        Ok(())
    }
}
