//! The subset of the `lnrpc` protobuf schema used for backup mirroring.
//!
//! Only the fields chanbackup reads are declared; prost skips unknown
//! fields, so the node may send the full messages.

use chanbackup_types::BackupSnapshot;
use prost::Message;

/// gRPC service the backup calls live on.
pub const LIGHTNING_SERVICE: &str = "lnrpc.Lightning";

pub const GET_INFO_PATH: &str = "/lnrpc.Lightning/GetInfo";
pub const EXPORT_ALL_CHANNEL_BACKUPS_PATH: &str = "/lnrpc.Lightning/ExportAllChannelBackups";
pub const SUBSCRIBE_CHANNEL_BACKUPS_PATH: &str = "/lnrpc.Lightning/SubscribeChannelBackups";

#[derive(Clone, PartialEq, Message)]
pub struct GetInfoRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct GetInfoResponse {
    #[prost(string, tag = "1")]
    pub identity_pubkey: String,
    #[prost(string, tag = "2")]
    pub alias: String,
    #[prost(uint32, tag = "6")]
    pub block_height: u32,
    #[prost(string, tag = "14")]
    pub version: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChanBackupExportRequest {}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelBackupSubscription {}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelPoint {
    #[prost(oneof = "channel_point::FundingTxid", tags = "1, 2")]
    pub funding_txid: Option<channel_point::FundingTxid>,
    #[prost(uint32, tag = "3")]
    pub output_index: u32,
}

pub mod channel_point {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum FundingTxid {
        #[prost(bytes, tag = "1")]
        FundingTxidBytes(Vec<u8>),
        #[prost(string, tag = "2")]
        FundingTxidStr(String),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelBackup {
    #[prost(message, optional, tag = "1")]
    pub chan_point: Option<ChannelPoint>,
    #[prost(bytes = "vec", tag = "2")]
    pub chan_backup: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChannelBackups {
    #[prost(message, repeated, tag = "1")]
    pub chan_backups: Vec<ChannelBackup>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MultiChanBackup {
    #[prost(message, repeated, tag = "1")]
    pub chan_points: Vec<ChannelPoint>,
    #[prost(bytes = "vec", tag = "2")]
    pub multi_chan_backup: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChanBackupSnapshot {
    #[prost(message, optional, tag = "1")]
    pub single_chan_backups: Option<ChannelBackups>,
    #[prost(message, optional, tag = "2")]
    pub multi_chan_backup: Option<MultiChanBackup>,
}

/// The single-channel half is kept as the encoded `ChannelBackups` message,
/// which restores through `RestoreChannelBackups`. The multi-channel half is
/// the packed backup blob itself, byte for byte what the node writes to its
/// `channel.backup` file. A missing half becomes an empty payload.
impl From<ChanBackupSnapshot> for BackupSnapshot {
    fn from(snapshot: ChanBackupSnapshot) -> Self {
        if snapshot.single_chan_backups.is_none() || snapshot.multi_chan_backup.is_none() {
            tracing::debug!("backup snapshot is missing a half, storing it as empty");
        }
        let single = snapshot
            .single_chan_backups
            .map(|backups| backups.encode_to_vec())
            .unwrap_or_default();
        let multi = snapshot
            .multi_chan_backup
            .map(|backup| backup.multi_chan_backup)
            .unwrap_or_default();
        BackupSnapshot::new(single, multi)
    }
}
