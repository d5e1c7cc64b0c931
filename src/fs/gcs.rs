use anyhow::{Context, Result};
use opendal::{services::Gcs, Operator};

use crate::fs::backend::BackendType;

/// Connection settings for a Google Cloud Storage bucket
#[derive(Debug, Clone)]
pub struct GcsSettings {
    pub bucket: String,
    /// Service account JSON file; `None` uses Application Default Credentials.
    pub credential_path: Option<String>,
}

impl GcsSettings {
    /// Use the standard Google credential chain:
    /// 1. GOOGLE_APPLICATION_CREDENTIALS env var
    /// 2. Well-known credentials file (~/.config/gcloud)
    /// 3. GCE metadata server / GKE Workload Identity
    pub fn with_workload_identity(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            credential_path: None,
        }
    }

    /// Use a service account JSON file
    pub fn from_service_account(bucket: &str, service_account_path: &str) -> Result<Self> {
        if !std::path::Path::new(service_account_path).is_file() {
            anyhow::bail!("Service account file not found: {}", service_account_path);
        }

        Ok(Self {
            bucket: bucket.to_string(),
            credential_path: Some(service_account_path.to_string()),
        })
    }

    /// Build the OpenDAL operator for this bucket
    pub fn operator(&self) -> Result<Operator> {
        let mut builder = Gcs::default().bucket(&self.bucket);

        if let Some(path) = &self.credential_path {
            builder = builder.credential_path(path);
        }

        let operator = Operator::new(builder)
            .with_context(|| format!("Failed to configure GCS bucket {}", self.bucket))?
            .finish();
        Ok(operator)
    }

    pub fn backend_type(&self) -> BackendType {
        BackendType::Gcs {
            bucket: self.bucket.clone(),
        }
    }

    pub fn display_path(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}
