use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::fs::types::{FileNode, IdentityScope};

/// Backend type information for display and identification
#[derive(Debug, Clone, PartialEq)]
pub enum BackendType {
    S3 { bucket: String, region: String, provider: S3Provider },
    Gcs { bucket: String },
    Memory,
}

impl BackendType {
    /// Get a short display name for the backend
    pub fn short_name(&self) -> &'static str {
        match self {
            BackendType::S3 { .. } => "S3",
            BackendType::Gcs { .. } => "GCS",
            BackendType::Memory => "Memory",
        }
    }
}

/// S3-compatible storage providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum S3Provider {
    Aws,
    DigitalOcean,
    Hetzner,
    #[serde(rename = "minio")]
    MinIO,
    CloudflareR2,
    Wasabi,
    Custom { name: String, endpoint: String },
}

impl S3Provider {
    /// Get the endpoint URL for this provider
    pub fn endpoint(&self, region: &str) -> Option<String> {
        match self {
            S3Provider::Aws => None, // Use default AWS endpoint
            S3Provider::DigitalOcean => Some(format!("https://{}.digitaloceanspaces.com", region)),
            S3Provider::Hetzner => Some(format!("https://{}.your-objectstorage.com", region)),
            S3Provider::MinIO => Some("http://localhost:9000".to_string()),
            S3Provider::CloudflareR2 => Some(format!("https://{}.r2.cloudflarestorage.com", region)),
            S3Provider::Wasabi => Some(format!("https://s3.{}.wasabisys.com", region)),
            S3Provider::Custom { endpoint, .. } => Some(endpoint.clone()),
        }
    }
}

/// Byte-level progress of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferUpdate {
    pub bytes_done: u64,
    pub total_bytes: u64,
}

/// Callback receiving per-chunk transfer progress
pub type TransferProgress = dyn Fn(TransferUpdate) + Send + Sync;

/// Remote object storage as seen by the sync engine.
///
/// Keys are slash-separated and never start with `/`. Implementations own
/// pagination, retries and transfer parallelism.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// List every object under `prefix` visible to `scope`. Returned paths are
    /// relative to `prefix`.
    async fn list(
        &self,
        prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileNode>>;

    /// Upload a local file to `remote_key`, tagging it with `role_tags`.
    async fn upload(
        &self,
        local_file: &Path,
        remote_key: &str,
        role_tags: &[String],
        progress: Option<&TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<bool>;

    /// Download `remote_key` into `local_dir`, keeping the key's file name and
    /// setting the local modification time to the remote one.
    async fn download(
        &self,
        remote_key: &str,
        local_dir: &Path,
        progress: Option<&TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn delete(&self, remote_key: &str, cancel: &CancellationToken) -> Result<()>;

    /// Get the backend type
    fn backend_type(&self) -> BackendType;

    /// Get display path for a key
    fn display_path(&self, key: &str) -> String {
        key.to_string()
    }
}

/// Join a remote prefix and a relative path into an object key.
pub fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Strip `prefix` from an object key, returning the path relative to it.
pub fn relative_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        return Some(key);
    }
    key.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}
