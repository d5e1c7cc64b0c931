//! TOML configuration for a sync job.
//!
//! ```toml
//! local_root = "/srv/share"
//! remote_prefix = "team/docs"
//! roles = ["finance"]
//! bandwidth_limit = 1048576
//! conflict_strategy = "last-write-wins"
//!
//! [remote]
//! kind = "s3"
//! bucket = "backups"
//! region = "eu-west-1"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::fs::backend::{RemoteStorage, S3Provider};
use crate::fs::gcs::GcsSettings;
use crate::fs::remote::{ObjectStoreRemote, TransferOptions};
use crate::fs::s3::S3Settings;
use crate::fs::types::IdentityScope;
use crate::sync::conflict::ConflictStrategy;
use crate::sync::exclude::ExcludePatterns;
use crate::sync::snapshot::JsonSnapshotStore;
use crate::sync::throttle::BandwidthLimit;

pub const APP_DIR: &str = "bucketsync";
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Which bucket the remote side lives in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemoteConfig {
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        provider: Option<S3Provider>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
    },
    Gcs {
        bucket: String,
        /// Service account JSON; Application Default Credentials otherwise.
        #[serde(default)]
        service_account: Option<String>,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_concurrent_transfers() -> usize {
    num_cpus::get()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    pub local_root: PathBuf,
    #[serde(default)]
    pub remote_prefix: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// See every remote object regardless of role tags.
    #[serde(default)]
    pub unrestricted: bool,
    /// Bytes per second per transfer; 0 means unlimited.
    #[serde(default)]
    pub bandwidth_limit: BandwidthLimit,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Extra exclude globs, added to the built-in defaults.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    pub remote: RemoteConfig,
}

impl SyncConfig {
    /// `<config dir>/bucketsync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_root.as_os_str().is_empty() {
            return Err(SyncError::Config("local_root must be set".into()));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be positive".into()));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(SyncError::Config(
                "max_concurrent_transfers must be positive".into(),
            ));
        }
        match &self.remote {
            RemoteConfig::S3 { bucket, .. } | RemoteConfig::Gcs { bucket, .. }
                if bucket.trim().is_empty() =>
            {
                Err(SyncError::Config("remote bucket must be set".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn scope(&self) -> IdentityScope {
        if self.unrestricted {
            IdentityScope::unrestricted()
        } else {
            IdentityScope::new(self.roles.iter().cloned())
        }
    }

    pub fn excludes(&self) -> Result<ExcludePatterns> {
        let mut excludes = ExcludePatterns::with_defaults();
        for pattern in &self.exclude {
            excludes.add_pattern(pattern).map_err(|e| {
                SyncError::Config(format!("Invalid exclude pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(excludes)
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            bandwidth_limit: self.bandwidth_limit,
            max_concurrent_transfers: self.max_concurrent_transfers,
            chunk_size: self.chunk_size,
        }
    }

    /// Snapshot location, defaulting to a per-bucket/prefix file under the data dir.
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.snapshot_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| SyncError::Config("no data directory for snapshots".into()))?;
        Ok(data_dir.join(APP_DIR).join(format!("{}.json.xz", self.snapshot_name())))
    }

    fn snapshot_name(&self) -> String {
        let bucket = match &self.remote {
            RemoteConfig::S3 { bucket, .. } | RemoteConfig::Gcs { bucket, .. } => bucket,
        };
        let raw = format!("{}-{}", bucket, self.remote_prefix.trim_matches('/'));
        raw.trim_end_matches('-')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }

    pub fn open_snapshots(&self) -> Result<JsonSnapshotStore> {
        let path = self.snapshot_path()?;
        JsonSnapshotStore::open(path).map_err(SyncError::Snapshot)
    }

    pub fn build_remote(&self) -> Result<Arc<dyn RemoteStorage>> {
        let (operator, backend) = match &self.remote {
            RemoteConfig::S3 {
                bucket,
                region,
                provider,
                access_key_id,
                secret_access_key,
            } => {
                let mut settings =
                    S3Settings::new(bucket, region, provider.clone().unwrap_or(S3Provider::Aws));
                match (access_key_id, secret_access_key) {
                    (Some(key), Some(secret)) => {
                        settings = settings.with_credentials(key, secret);
                    }
                    (None, None) => {}
                    _ => {
                        return Err(SyncError::Config(
                            "access_key_id and secret_access_key must be set together".into(),
                        ))
                    }
                }
                let operator = settings
                    .operator()
                    .map_err(|e| SyncError::Config(format!("{:#}", e)))?;
                (operator, settings.backend_type())
            }
            RemoteConfig::Gcs {
                bucket,
                service_account,
            } => {
                let settings = match service_account {
                    Some(path) => GcsSettings::from_service_account(bucket, path)
                        .map_err(|e| SyncError::Config(format!("{:#}", e)))?,
                    None => GcsSettings::with_workload_identity(bucket),
                };
                let operator = settings
                    .operator()
                    .map_err(|e| SyncError::Config(format!("{:#}", e)))?;
                (operator, settings.backend_type())
            }
        };

        Ok(Arc::new(ObjectStoreRemote::new(
            operator,
            backend,
            self.transfer_options(),
        )))
    }
}
