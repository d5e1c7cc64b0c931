use anyhow::{Context, Result};
use opendal::{services::S3, Operator};

use crate::fs::backend::{BackendType, S3Provider};

/// Connection settings for an S3 or S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub provider: S3Provider,
    /// Explicit credentials; `None` uses the standard AWS credential chain.
    pub credentials: Option<(String, String)>,
}

impl S3Settings {
    /// AWS bucket with explicit credentials
    pub fn aws(bucket: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        Self::new(bucket, region, S3Provider::Aws)
            .with_credentials(access_key, secret_key)
    }

    /// AWS bucket using the standard AWS credential chain:
    /// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
    /// 2. Shared credentials file (~/.aws/credentials)
    /// 3. EC2 Instance Profile / ECS Task Role / EKS Pod Identity
    pub fn with_iam(bucket: &str, region: &str) -> Self {
        Self::new(bucket, region, S3Provider::Aws)
    }

    pub fn new(bucket: &str, region: &str, provider: S3Provider) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            provider,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, access_key: &str, secret_key: &str) -> Self {
        self.credentials = Some((access_key.to_string(), secret_key.to_string()));
        self
    }

    /// Build the OpenDAL operator for this bucket
    pub fn operator(&self) -> Result<Operator> {
        let mut builder = S3::default()
            .bucket(&self.bucket)
            .region(&self.region);

        if let Some((access_key, secret_key)) = &self.credentials {
            builder = builder
                .access_key_id(access_key)
                .secret_access_key(secret_key);
        }

        // Set custom endpoint for S3-compatible providers
        if let Some(endpoint) = self.provider.endpoint(&self.region) {
            builder = builder.endpoint(&endpoint);
        }

        let operator = Operator::new(builder)
            .with_context(|| format!("Failed to configure S3 bucket {}", self.bucket))?
            .finish();
        Ok(operator)
    }

    pub fn backend_type(&self) -> BackendType {
        BackendType::S3 {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            provider: self.provider.clone(),
        }
    }

    pub fn display_path(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}
