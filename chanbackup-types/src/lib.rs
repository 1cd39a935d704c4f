//! Core types for chanbackup.
//!
//! A [`BackupSnapshot`] is the pair of opaque channel backup payloads a node
//! emits at one point in time. Each half is persisted under a deterministic
//! key derived from the node's [`NodeIdentity`] and the [`BackupPart`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier of the node whose backups are mirrored (its identity pubkey).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Object key for one half of this node's backup.
    pub fn object_key(&self, part: BackupPart) -> String {
        format!("{}.{}", self.0, part.key_suffix())
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One of the two independently stored halves of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPart {
    SingleChannel,
    MultiChannel,
}

impl BackupPart {
    /// Both halves, in the order they are written.
    pub const ALL: [BackupPart; 2] = [BackupPart::SingleChannel, BackupPart::MultiChannel];

    pub fn key_suffix(self) -> &'static str {
        match self {
            BackupPart::SingleChannel => "SingleChanBackups.bak",
            BackupPart::MultiChannel => "MultiChanBackup.bak",
        }
    }
}

impl fmt::Display for BackupPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupPart::SingleChannel => f.write_str("single-channel"),
            BackupPart::MultiChannel => f.write_str("multi-channel"),
        }
    }
}

/// The paired single-channel and multi-channel backup payloads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub single_channel_backups: Vec<u8>,
    pub multi_channel_backup: Vec<u8>,
}

impl BackupSnapshot {
    pub fn new(single_channel_backups: impl Into<Vec<u8>>, multi_channel_backup: impl Into<Vec<u8>>) -> Self {
        Self {
            single_channel_backups: single_channel_backups.into(),
            multi_channel_backup: multi_channel_backup.into(),
        }
    }

    /// Returns the payload for one half.
    pub fn part(&self, part: BackupPart) -> &[u8] {
        match part {
            BackupPart::SingleChannel => &self.single_channel_backups,
            BackupPart::MultiChannel => &self.multi_channel_backup,
        }
    }

    /// Total payload size of both halves in bytes.
    pub fn size(&self) -> usize {
        self.single_channel_backups.len() + self.multi_channel_backup.len()
    }

    /// SHA-256 over both halves. Each half is length-prefixed so that moving
    /// bytes from one half to the other changes the digest.
    pub fn digest(&self) -> SnapshotDigest {
        let mut hasher = Sha256::new();
        for part in BackupPart::ALL {
            let bytes = self.part(part);
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }
        SnapshotDigest(hasher.finalize().into())
    }
}

// Payloads are key material; keep them out of logs.
impl fmt::Debug for BackupSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSnapshot")
            .field("single_channel_backups", &format_args!("<{} bytes>", self.single_channel_backups.len()))
            .field("multi_channel_backup", &format_args!("<{} bytes>", self.multi_channel_backup.len()))
            .finish()
    }
}

/// Content digest of a [`BackupSnapshot`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotDigest([u8; 32]);

impl SnapshotDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotDigest({})", self.short())
    }
}
