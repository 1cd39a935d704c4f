//! Local directory store.

use crate::BackupStore;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stores each object as a file directly under `root`.
///
/// Writes go to a hidden temporary sibling which is fsynced and then renamed
/// over the target, so a reader sees either the old or the new contents.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates the root directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_key(key: &str) -> StoreResult<()> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.contains('\0')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    async fn write_atomic(target: &Path, temp: &Path, bytes: &[u8]) -> StoreResult<()> {
        let mut file = tokio::fs::File::create(temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(temp, target).await?;
        Ok(())
    }
}

#[async_trait]
impl BackupStore for FsStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        Self::validate_key(key)?;
        let target = self.root.join(key);
        let temp = self.root.join(format!(".{key}.tmp"));

        if let Err(e) = Self::write_atomic(&target, &temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        debug!("wrote {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
