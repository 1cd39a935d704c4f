//! Backup source for chanbackup.
//!
//! Provides:
//! - Composite credentials (TLS trust anchor + per-call macaroon interceptor)
//! - A TLS connector that accepts the node's pinned self-signed certificate
//! - A gRPC client for `GetInfo`, `ExportAllChannelBackups` and
//!   `SubscribeChannelBackups`
//! - The [`SourceConnector`] / [`BackupSource`] traits the sync engine drives

pub mod client;
pub mod credentials;
pub mod error;
pub mod proto;
pub mod source;
pub mod tls;

pub use client::{ConnectOptions, LightningClient};
pub use credentials::{CompositeCredential, MacaroonInterceptor, MACAROON_METADATA_KEY};
pub use error::{RpcError, RpcResult};
pub use source::{BackupSource, LndConnector, SnapshotStream, SourceConnector};
pub use tls::{TlsConnector, TrustAnchor};
