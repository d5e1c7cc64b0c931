//! Object storage client for the remote side of a sync, built on OpenDAL.
//!
//! Role tags and the source file's modification time travel as object user
//! metadata. Backends that cannot store user metadata get a JSON sidecar
//! object named `<key>.bucketsync-meta` instead. Listing reports the stored
//! source mtime when present, so an object uploaded from an unchanged local
//! file compares equal to it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use opendal::{ErrorKind, Metadata, Operator};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::SyncError;
use crate::fs::backend::{relative_key, BackendType, RemoteStorage, TransferProgress, TransferUpdate};
use crate::fs::types::{FileNode, IdentityScope};
use crate::sync::exclude::{METADATA_SUFFIX, PARTIAL_SUFFIX};
use crate::sync::throttle::{BandwidthLimit, BandwidthLimiter, ThrottledReader, TransferStats};

/// User metadata key holding comma-separated role tags.
pub const ROLES_METADATA_KEY: &str = "access-roles";
/// User metadata key holding the uploaded file's RFC 3339 mtime.
pub const MTIME_METADATA_KEY: &str = "src-mtime";

/// Transfer tuning shared by every transfer of one client.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Ceiling applied to each transfer stream separately.
    pub bandwidth_limit: BandwidthLimit,
    /// Concurrent transfers (and metadata lookups) allowed at once.
    pub max_concurrent_transfers: usize,
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            bandwidth_limit: BandwidthLimit::unlimited(),
            max_concurrent_transfers: 4,
            chunk_size: 256 * 1024,
        }
    }
}

/// [`RemoteStorage`] over any OpenDAL operator.
pub struct ObjectStoreRemote {
    operator: Operator,
    backend: BackendType,
    options: TransferOptions,
    transfers: Arc<Semaphore>,
}

impl ObjectStoreRemote {
    pub fn new(operator: Operator, backend: BackendType, options: TransferOptions) -> Self {
        let permits = options.max_concurrent_transfers.max(1);
        Self {
            operator,
            backend,
            options,
            transfers: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn options(&self) -> TransferOptions {
        self.options
    }

    fn list_root(prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        }
    }

    /// Whether the backend keeps user metadata on the object itself.
    pub fn native_metadata(&self) -> bool {
        self.operator.info().full_capability().write_with_user_metadata
    }

    fn sidecar_key(key: &str) -> String {
        format!("{}{}", key, METADATA_SUFFIX)
    }

    async fn read_sidecar(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let sidecar = Self::sidecar_key(key);
        match self.operator.read(&sidecar).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map(Some)
                .with_context(|| format!("Corrupt metadata object {}", self.display_path(&sidecar))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read {}", self.display_path(&sidecar))),
        }
    }

    /// Stat `key` and report it as `path`.
    async fn object_node(&self, path: String, key: &str) -> Result<FileNode> {
        let meta = self
            .operator
            .stat(key)
            .await
            .with_context(|| format!("Failed to stat {}", self.display_path(key)))?;
        let sidecar = if self.native_metadata() {
            None
        } else {
            self.read_sidecar(key).await?
        };
        node_from_metadata(path, &meta, sidecar.as_ref())
            .with_context(|| format!("Unusable object {}", self.display_path(key)))
    }

    async fn describe(&self, prefix: &str, key: String) -> Result<Option<FileNode>> {
        let Some(path) = relative_key(prefix, &key) else {
            return Ok(None);
        };
        let path = path.to_string();

        let _permit = self.transfers.acquire().await.context("Transfer pool closed")?;
        self.object_node(path, &key).await.map(Some)
    }
}

/// Build a [`FileNode`] from object metadata, preferring the object's own user
/// metadata over a sidecar's. Fails when no modification time is known.
pub fn node_from_metadata(
    path: String,
    meta: &Metadata,
    sidecar: Option<&HashMap<String, String>>,
) -> Result<FileNode> {
    let user = meta.user_metadata().or(sidecar);
    let source_mtime = user
        .and_then(|m| m.get(MTIME_METADATA_KEY))
        .and_then(|value| parse_timestamp(value));
    let provider_mtime = meta
        .last_modified()
        .and_then(|ts| parse_timestamp(&ts.to_string()));
    let last_modified = source_mtime
        .or(provider_mtime)
        .with_context(|| format!("No modification time for {}", path))?;
    let roles = user
        .and_then(|m| m.get(ROLES_METADATA_KEY))
        .map(|value| parse_roles(value))
        .unwrap_or_default();

    let mut node = FileNode::file(path, meta.content_length(), last_modified);
    node.access_roles = roles;
    node.version = meta.version().map(str::to_string);
    Ok(node)
}

/// Parse a comma-separated role list.
pub fn parse_roles(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a provider timestamp in RFC 3339 or `YYYY-MM-DD HH:MM:SS[.f] UTC` form.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = value.strip_suffix(" UTC").unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

fn report(progress: Option<&TransferProgress>, bytes_done: u64, total_bytes: u64) {
    if let Some(progress) = progress {
        progress(TransferUpdate {
            bytes_done,
            total_bytes,
        });
    }
}

#[async_trait]
impl RemoteStorage for ObjectStoreRemote {
    async fn list(
        &self,
        prefix: &str,
        scope: &IdentityScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileNode>> {
        let root = Self::list_root(prefix);
        let entries = self
            .operator
            .list_with(&root)
            .recursive(true)
            .await
            .with_context(|| format!("Failed to list {}", self.display_path(&root)))?;

        let keys: Vec<String> = entries
            .into_iter()
            .filter(|entry| !entry.metadata().mode().is_dir())
            .map(|entry| entry.path().to_string())
            .filter(|key| !key.ends_with(METADATA_SUFFIX))
            .collect();
        debug!(prefix, objects = keys.len(), "listed remote prefix");

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }

        let limit = self.options.max_concurrent_transfers.max(1);
        let nodes: Vec<Option<FileNode>> = stream::iter(keys)
            .map(|key| self.describe(prefix, key))
            .buffered(limit)
            .try_collect()
            .await?;

        Ok(nodes
            .into_iter()
            .flatten()
            .filter(|node| scope.can_see(node))
            .collect())
    }

    async fn upload(
        &self,
        local_file: &Path,
        remote_key: &str,
        role_tags: &[String],
        progress: Option<&TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let _permit = self.transfers.acquire().await.context("Transfer pool closed")?;

        let file = tokio::fs::File::open(local_file)
            .await
            .with_context(|| format!("Failed to open {}", local_file.display()))?;
        let metadata = file.metadata().await?;
        let total = metadata.len();
        let mtime: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .with_context(|| format!("No modification time for {}", local_file.display()))?;

        let mut user_metadata = HashMap::new();
        user_metadata.insert(MTIME_METADATA_KEY.to_string(), mtime.to_rfc3339());
        if !role_tags.is_empty() {
            user_metadata.insert(ROLES_METADATA_KEY.to_string(), role_tags.join(","));
        }

        let native = self.native_metadata();
        let writer = if native {
            self.operator
                .writer_with(remote_key)
                .user_metadata(user_metadata.clone())
                .await
        } else {
            self.operator.writer(remote_key).await
        };
        let mut writer = writer
            .with_context(|| format!("Failed to open writer for {}", self.display_path(remote_key)))?;

        let mut reader = ThrottledReader::new(file, self.options.bandwidth_limit);
        let mut stats = TransferStats::start();
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];

        loop {
            if cancel.is_cancelled() {
                let _ = writer.abort().await;
                return Err(SyncError::Cancelled.into());
            }
            let read = reader
                .read(&mut buf)
                .await
                .with_context(|| format!("Failed to read {}", local_file.display()))?;
            if read == 0 {
                break;
            }
            writer
                .write(buf[..read].to_vec())
                .await
                .with_context(|| format!("Failed to upload to {}", self.display_path(remote_key)))?;
            stats.record(read as u64);
            report(progress, stats.bytes_transferred, total);
        }

        writer
            .close()
            .await
            .with_context(|| format!("Failed to finish upload to {}", self.display_path(remote_key)))?;
        if !native {
            let sidecar = Self::sidecar_key(remote_key);
            self.operator
                .write(&sidecar, serde_json::to_vec(&user_metadata)?)
                .await
                .with_context(|| format!("Failed to write {}", self.display_path(&sidecar)))?;
        }
        stats.stop();
        trace!(key = remote_key, bytes = stats.bytes_transferred, rate = %stats.rate_display(), "uploaded");
        Ok(true)
    }

    async fn download(
        &self,
        remote_key: &str,
        local_dir: &Path,
        progress: Option<&TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _permit = self.transfers.acquire().await.context("Transfer pool closed")?;

        let file_name = remote_key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .with_context(|| format!("Object key has no file name: {}", remote_key))?;
        let target = local_dir.join(file_name);
        let partial = local_dir.join(format!(".{}{}", file_name, PARTIAL_SUFFIX));

        let node = self.object_node(file_name.to_string(), remote_key).await?;
        let total = node.size;

        let mut out = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut limiter = BandwidthLimiter::new(self.options.bandwidth_limit);
        let mut stats = TransferStats::start();
        let chunk = self.options.chunk_size.max(1) as u64;
        let mut offset = 0u64;

        while offset < total {
            if cancel.is_cancelled() {
                drop(out);
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(SyncError::Cancelled.into());
            }
            let end = (offset + chunk).min(total);
            let data = self
                .operator
                .read_with(remote_key)
                .range(offset..end)
                .await
                .with_context(|| format!("Failed to download {}", self.display_path(remote_key)))?
                .to_vec();
            if data.is_empty() {
                anyhow::bail!("Unexpected end of object {} at byte {}", remote_key, offset);
            }
            limiter.acquire(data.len()).await;
            out.write_all(&data).await?;
            offset += data.len() as u64;
            stats.record(data.len() as u64);
            report(progress, offset, total);
        }

        out.flush().await?;
        let std_file = out.into_std().await;
        std_file
            .set_modified(SystemTime::from(node.last_modified))
            .with_context(|| format!("Failed to set modification time on {}", partial.display()))?;
        drop(std_file);

        tokio::fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to move download into {}", target.display()))?;
        stats.stop();
        trace!(key = remote_key, bytes = stats.bytes_transferred, rate = %stats.rate_display(), "downloaded");
        Ok(())
    }

    async fn delete(&self, remote_key: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }
        self.operator
            .delete(remote_key)
            .await
            .with_context(|| format!("Failed to delete {}", self.display_path(remote_key)))?;
        if !self.native_metadata() {
            let sidecar = Self::sidecar_key(remote_key);
            self.operator
                .delete(&sidecar)
                .await
                .with_context(|| format!("Failed to delete {}", self.display_path(&sidecar)))?;
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        self.backend.clone()
    }

    fn display_path(&self, key: &str) -> String {
        match &self.backend {
            BackendType::S3 { bucket, .. } => format!("s3://{}/{}", bucket, key),
            BackendType::Gcs { bucket } => format!("gs://{}/{}", bucket, key),
            BackendType::Memory => key.to_string(),
        }
    }
}
