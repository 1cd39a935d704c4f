//! Backup object stores for chanbackup.
//!
//! The sync engine needs exactly one primitive: overwrite the object at a
//! key and acknowledge. Backends:
//! - [`S3Store`]: S3 or any S3-compatible service
//! - [`FsStore`]: a local directory with atomic file replacement
//! - [`MemoryStore`]: in-process map

pub mod error;
pub mod filesystem;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub use error::{StoreError, StoreResult};
pub use filesystem::FsStore;
pub use memory::MemoryStore;
pub use s3::{S3Store, S3StoreConfig};

/// Overwrite-only object store.
///
/// Implementations must replace any existing object at `key` and must
/// report a failure rather than leave a truncated object behind.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()>;

    /// Short description of the target, for logs.
    fn describe(&self) -> String;
}

/// Which backend to build, as read from configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    S3(S3StoreConfig),
    Filesystem { data_dir: PathBuf },
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::S3(S3StoreConfig::default())
    }
}

impl StoreConfig {
    /// Builds the configured backend.
    pub async fn initialize(&self) -> StoreResult<Arc<dyn BackupStore>> {
        let store: Arc<dyn BackupStore> = match self {
            StoreConfig::S3(config) => Arc::new(S3Store::new(config).await?),
            StoreConfig::Filesystem { data_dir } => Arc::new(FsStore::create(data_dir).await?),
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
        };
        info!("backup store initialized: {}", store.describe());
        Ok(store)
    }
}
