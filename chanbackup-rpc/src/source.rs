//! Backup source abstraction.
//!
//! The sync engine only sees [`SourceConnector`] and [`BackupSource`]; the
//! node implementation below is one of them, tests script their own.

use crate::client::{ConnectOptions, LightningClient};
use crate::credentials::CompositeCredential;
use crate::error::{RpcError, RpcResult};
use async_trait::async_trait;
use chanbackup_types::{BackupSnapshot, NodeIdentity};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::debug;

/// Unbounded stream of backup snapshots pushed by the source.
pub type SnapshotStream = BoxStream<'static, RpcResult<BackupSnapshot>>;

/// One authenticated session with a backup source.
#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Identity of the node behind this session.
    async fn identity(&self) -> RpcResult<NodeIdentity>;

    /// Full export of every current channel backup.
    async fn export_all_backups(&self) -> RpcResult<BackupSnapshot>;

    /// Subscribes to backup updates. Each item supersedes the previous one.
    async fn subscribe_backups(&self) -> RpcResult<SnapshotStream>;
}

/// Opens sessions. Called once at startup and again on every reconnect.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> RpcResult<Box<dyn BackupSource>>;

    /// Human readable target, for logs.
    fn endpoint(&self) -> &str;
}

/// Connects to a Lightning node's gRPC interface.
pub struct LndConnector {
    endpoint: String,
    credential: CompositeCredential,
    options: ConnectOptions,
}

impl LndConnector {
    pub fn new(endpoint: impl Into<String>, credential: CompositeCredential, options: ConnectOptions) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential,
            options,
        }
    }
}

#[async_trait]
impl SourceConnector for LndConnector {
    async fn connect(&self) -> RpcResult<Box<dyn BackupSource>> {
        let client = LightningClient::connect(&self.endpoint, &self.credential, &self.options).await?;
        Ok(Box::new(LndSource { client }))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct LndSource {
    client: LightningClient,
}

#[async_trait]
impl BackupSource for LndSource {
    async fn identity(&self) -> RpcResult<NodeIdentity> {
        let info = self.client.get_info().await?;
        if info.identity_pubkey.is_empty() {
            return Err(RpcError::EmptyIdentity);
        }
        debug!(
            "node {} (alias {:?}, version {}, height {})",
            info.identity_pubkey, info.alias, info.version, info.block_height
        );
        Ok(NodeIdentity::new(info.identity_pubkey))
    }

    async fn export_all_backups(&self) -> RpcResult<BackupSnapshot> {
        let snapshot = self.client.export_all_channel_backups().await?;
        Ok(snapshot.into())
    }

    async fn subscribe_backups(&self) -> RpcResult<SnapshotStream> {
        let stream = self.client.subscribe_channel_backups().await?;
        Ok(stream
            .map(|item| item.map(BackupSnapshot::from).map_err(RpcError::from))
            .boxed())
    }
}
