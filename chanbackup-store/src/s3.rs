//! S3 object store adapter.
//!
//! One client is built per store and shared by every engine writing through
//! it; the SDK client is internally pooled and safe to use concurrently.

use crate::BackupStore;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, RequestChecksumCalculation};
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Connection settings for an S3 (or S3-compatible) bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3StoreConfig {
    /// Bucket the backup objects are written to.
    pub bucket: String,

    /// AWS region of the bucket.
    pub region: String,

    /// Optional endpoint override (MinIO, other S3-compatible services).
    /// Enables path-style addressing.
    pub endpoint_override: Option<String>,

    /// Static access key. When both keys are unset the default AWS
    /// credential chain is used.
    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,

    /// Optional prefix; objects are stored as `{prefix}/{key}`.
    pub key_prefix: Option<String>,

    /// Attempts per PutObject inside the SDK, before the engine's own retry.
    pub max_attempts: u32,
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            bucket: "chanbackup".to_string(),
            region: "us-east-1".to_string(),
            endpoint_override: None,
            access_key_id: None,
            secret_access_key: None,
            key_prefix: None,
            max_attempts: 3,
        }
    }
}

/// Writes backup objects with `PutObject`, which replaces any existing object.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    key_prefix: Option<String>,
}

impl S3Store {
    pub async fn new(config: &S3StoreConfig) -> StoreResult<Self> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("S3 bucket name is empty".into()));
        }

        let builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials = aws_credential_types::Credentials::new(
                    access_key_id,
                    secret_access_key,
                    None,
                    None,
                    "chanbackup-static",
                );
                aws_sdk_s3::Config::builder()
                    .credentials_provider(credentials)
                    .behavior_version_latest()
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(StoreError::Config(
                    "access_key_id and secret_access_key must be set together".into(),
                ));
            }
        };

        let mut builder = builder
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)))
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired);

        if let Some(ref endpoint) = config.endpoint_override {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            key_prefix: config
                .key_prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    /// Full object key including the configured prefix.
    pub fn object_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl BackupStore for S3Store {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let key = self.object_key(key);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("upload failed for {key}: {e}")))?;

        debug!("uploaded {size} bytes to s3://{}/{key}", self.bucket);
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("s3://{}/{prefix}", self.bucket),
            None => format!("s3://{}", self.bucket),
        }
    }
}
