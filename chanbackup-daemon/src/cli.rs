//! Command-line flags. Each flag falls back to a `CHANBACKUP_*` variable.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "chanbackupd", version)]
#[command(about = "Mirror Lightning channel backups to object storage")]
pub struct Cli {
    /// JSON config file describing nodes, store and engine tuning
    #[arg(short, long, env = "CHANBACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node gRPC endpoint (host:port or URL)
    #[arg(long, env = "CHANBACKUP_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Node TLS certificate (PEM)
    #[arg(long, env = "CHANBACKUP_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Node macaroon (binary)
    #[arg(long, env = "CHANBACKUP_MACAROON")]
    pub macaroon: Option<PathBuf>,

    /// Name to verify the node certificate against, if not the endpoint host
    #[arg(long, env = "CHANBACKUP_TLS_DOMAIN")]
    pub tls_domain: Option<String>,

    /// S3 bucket
    #[arg(long, env = "CHANBACKUP_BUCKET", conflicts_with = "data_dir")]
    pub bucket: Option<String>,

    /// S3 region
    #[arg(long, env = "CHANBACKUP_REGION", conflicts_with = "data_dir")]
    pub region: Option<String>,

    /// S3-compatible endpoint override (MinIO etc.)
    #[arg(long, env = "CHANBACKUP_S3_ENDPOINT", conflicts_with = "data_dir")]
    pub s3_endpoint: Option<String>,

    /// Prefix for S3 object keys
    #[arg(long, env = "CHANBACKUP_KEY_PREFIX", conflicts_with = "data_dir")]
    pub key_prefix: Option<String>,

    /// Write backups to this local directory instead of S3
    #[arg(long, env = "CHANBACKUP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Stored object layout
    #[arg(long, env = "CHANBACKUP_ENCODING", value_parser = ["raw", "base64"])]
    pub encoding: Option<String>,
}
