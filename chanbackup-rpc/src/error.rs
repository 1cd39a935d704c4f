//! RPC source error types.

use thiserror::Error;
use tonic::Code;

/// Result type for RPC source operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors raised while assembling credentials or talking to the node.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid TLS certificate: {0}")]
    InvalidCertificate(String),

    #[error("macaroon is empty")]
    EmptyToken,

    #[error("invalid macaroon metadata value: {0}")]
    InvalidMetadata(String),

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("node returned an empty identity pubkey")]
    EmptyIdentity,

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("backup subscription closed by the node")]
    StreamClosed,

    #[error("no backup event within {0:?}")]
    IdleTimeout(std::time::Duration),
}

impl RpcError {
    /// True for failures a reconnect may cure. Credential and request errors
    /// are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport(_) | RpcError::StreamClosed | RpcError::IdleTimeout(_) => true,
            RpcError::Status(status) => is_transient_code(status.code()),
            RpcError::InvalidCertificate(_)
            | RpcError::EmptyToken
            | RpcError::InvalidMetadata(_)
            | RpcError::InvalidEndpoint { .. }
            | RpcError::EmptyIdentity => false,
        }
    }
}

fn is_transient_code(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable
            | Code::DeadlineExceeded
            | Code::Aborted
            | Code::Cancelled
            | Code::Unknown
            | Code::Internal
            | Code::ResourceExhausted
    )
}
