//! Engine tuning.

use crate::backoff::BackoffConfig;
use crate::error::{SyncError, SyncResult};
use crate::writer::ObjectEncoding;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries of export + write before the baseline is given up on.
    pub bootstrap_backoff: BackoffConfig,

    /// Retries of the failed half of a streamed snapshot.
    pub write_backoff: BackoffConfig,

    /// Delays between reconnect attempts after the session is lost.
    pub reconnect_backoff: BackoffConfig,

    /// Treat the subscription as dead after this long without an update.
    /// Unset means wait forever.
    pub idle_timeout_secs: Option<u64>,

    pub encoding: ObjectEncoding,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bootstrap_backoff: BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(60), Some(8)),
            write_backoff: BackoffConfig::new(Duration::from_millis(500), Duration::from_secs(30), Some(10)),
            reconnect_backoff: BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(300), None),
            idle_timeout_secs: None,
            encoding: ObjectEncoding::Raw,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> SyncResult<()> {
        self.bootstrap_backoff.validate("bootstrap_backoff")?;
        self.write_backoff.validate("write_backoff")?;
        self.reconnect_backoff.validate("reconnect_backoff")?;
        if self.idle_timeout_secs == Some(0) {
            return Err(SyncError::Config("idle_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
