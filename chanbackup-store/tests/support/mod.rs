//! Shared helpers for store integration tests.

#![allow(dead_code)]

use chanbackup_store::S3StoreConfig;

pub const BUCKET: &str = "lnd-backups";

/// Config pointing at a local mock endpoint with static credentials and
/// no SDK-level retries.
pub fn mock_s3_config(endpoint: &str) -> S3StoreConfig {
    S3StoreConfig {
        bucket: BUCKET.into(),
        region: "us-east-1".into(),
        endpoint_override: Some(endpoint.to_string()),
        access_key_id: Some("chanbackup-test".into()),
        secret_access_key: Some("chanbackup-test-secret".into()),
        key_prefix: None,
        max_attempts: 1,
    }
}
