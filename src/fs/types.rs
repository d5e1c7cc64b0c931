use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One file or directory, from either the local tree or the remote namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Leaf display name.
    pub name: String,
    /// Slash-separated path relative to the sync root.
    pub path: String,
    pub is_dir: bool,
    /// Byte count, 0 for directories.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Roles allowed to see the remote object. Empty on the local side.
    #[serde(default)]
    pub access_roles: BTreeSet<String>,
    /// Remote object version, when the provider reports one.
    #[serde(default)]
    pub version: Option<String>,
}

impl FileNode {
    /// Build a file node for `path`, deriving the display name from its last segment.
    pub fn file(path: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            name,
            path,
            is_dir: false,
            size,
            last_modified,
            access_roles: BTreeSet::new(),
            version: None,
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn format_size(&self) -> String {
        if self.is_dir {
            return "<DIR>".to_string();
        }
        humansize::format_size(self.size, humansize::DECIMAL)
    }
}

/// The caller's effective role set, used to filter remote listings and to
/// tag uploaded objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityScope {
    pub roles: BTreeSet<String>,
    /// Sees every object regardless of its role tags.
    #[serde(default)]
    pub unrestricted: bool,
}

impl IdentityScope {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            unrestricted: false,
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            roles: BTreeSet::new(),
            unrestricted: true,
        }
    }

    /// Untagged objects are public; tagged ones need a shared role.
    pub fn can_see(&self, node: &FileNode) -> bool {
        self.unrestricted
            || node.access_roles.is_empty()
            || node.access_roles.iter().any(|role| self.roles.contains(role))
    }

    /// Tags applied to objects uploaded under this scope.
    pub fn role_tags(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }
}
