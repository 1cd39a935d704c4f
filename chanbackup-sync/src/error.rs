//! Sync engine error types.

use chanbackup_rpc::RpcError;
use chanbackup_types::NodeIdentity;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that stop a sync engine. Transient failures are handled inside the
/// engine and never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: RpcError,
    },

    #[error("node identity changed from {expected} to {actual}")]
    IdentityMismatch {
        expected: NodeIdentity,
        actual: NodeIdentity,
    },

    #[error("baseline for {identity} not persisted after {attempts} attempts: {last_error}")]
    BootstrapExhausted {
        identity: NodeIdentity,
        attempts: u32,
        last_error: String,
    },

    #[error("snapshot for {identity} not persisted after {attempts} attempts: {last_error}")]
    WriteExhausted {
        identity: NodeIdentity,
        attempts: u32,
        last_error: String,
    },

    #[error("gave up reconnecting to {endpoint} after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    #[error("shut down with {pending} backup of {identity} not persisted: {last_error}")]
    IncompleteOnShutdown {
        identity: NodeIdentity,
        pending: String,
        last_error: String,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("sync engine not running")]
    ChannelClosed,
}
