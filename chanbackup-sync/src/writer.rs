//! Persists both halves of a snapshot.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chanbackup_store::{BackupStore, StoreError};
use chanbackup_types::{BackupPart, BackupSnapshot, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// How payload bytes are laid out in the stored object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectEncoding {
    /// Bytes verbatim.
    #[default]
    Raw,
    /// Standard base64 text.
    Base64,
}

impl ObjectEncoding {
    pub fn encode(self, payload: &[u8]) -> Vec<u8> {
        match self {
            ObjectEncoding::Raw => payload.to_vec(),
            ObjectEncoding::Base64 => STANDARD.encode(payload).into_bytes(),
        }
    }
}

/// Result of writing one snapshot.
#[derive(Debug)]
pub enum WriteOutcome {
    Success,
    /// Exactly one half failed; the other is stored.
    Partial { failed: BackupPart, error: StoreError },
    /// Both halves failed.
    Failure { errors: Vec<(BackupPart, StoreError)> },
}

impl WriteOutcome {
    fn from_failures(mut failures: Vec<(BackupPart, StoreError)>) -> Self {
        match failures.len() {
            0 => WriteOutcome::Success,
            1 => {
                let (failed, error) = failures.remove(0);
                WriteOutcome::Partial { failed, error }
            }
            _ => WriteOutcome::Failure { errors: failures },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Success)
    }

    /// Halves that still need writing, in write order.
    pub fn failed_parts(&self) -> Vec<BackupPart> {
        match self {
            WriteOutcome::Success => Vec::new(),
            WriteOutcome::Partial { failed, .. } => vec![*failed],
            WriteOutcome::Failure { errors } => errors.iter().map(|(part, _)| *part).collect(),
        }
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Success => write!(f, "both halves written"),
            WriteOutcome::Partial { failed, error } => write!(f, "{failed} write failed: {error}"),
            WriteOutcome::Failure { errors } => write!(f, "{}", describe_failures(errors)),
        }
    }
}

/// `"single-channel: <err>; multi-channel: <err>"`
pub fn describe_failures(failures: &[(BackupPart, StoreError)]) -> String {
    failures
        .iter()
        .map(|(part, error)| format!("{part}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Writes snapshots through a [`BackupStore`]. Holds no state between calls.
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn BackupStore>,
    encoding: ObjectEncoding,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn BackupStore>, encoding: ObjectEncoding) -> Self {
        Self { store, encoding }
    }

    /// Writes the single half, then the multi half. The second put is issued
    /// even if the first fails.
    pub async fn write(&self, identity: &NodeIdentity, snapshot: &BackupSnapshot) -> WriteOutcome {
        let failures = self.write_parts(identity, snapshot, &BackupPart::ALL).await;
        WriteOutcome::from_failures(failures)
    }

    /// Writes only `parts`, returning the ones that failed.
    pub async fn write_parts(
        &self,
        identity: &NodeIdentity,
        snapshot: &BackupSnapshot,
        parts: &[BackupPart],
    ) -> Vec<(BackupPart, StoreError)> {
        let mut failures = Vec::new();
        for &part in parts {
            let key = identity.object_key(part);
            let body = self.encoding.encode(snapshot.part(part));
            let size = body.len();
            match self.store.put(&key, body).await {
                Ok(()) => debug!("stored {key} ({size} bytes)"),
                Err(e) => {
                    warn!("failed to store {key}: {e}");
                    failures.push((part, e));
                }
            }
        }
        failures
    }
}
