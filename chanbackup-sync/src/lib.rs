//! Streaming channel-backup synchronization.
//!
//! A [`SyncEngine`] connects to one node through a
//! [`SourceConnector`](chanbackup_rpc::SourceConnector), persists a full
//! baseline, then persists every backup update in receipt order through a
//! [`SnapshotWriter`]. Lost sessions are re-established with backoff and
//! re-baselined.

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod writer;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use config::EngineConfig;
pub use engine::{
    EngineState, EngineStatus, SyncCommand, SyncEngine, SyncHandle, WrittenSnapshot, create_sync_engine,
};
pub use error::{SyncError, SyncResult};
pub use writer::{ObjectEncoding, SnapshotWriter, WriteOutcome};
