//! Daemon configuration: optional JSON file, then CLI overrides.

use crate::cli::Cli;
use anyhow::{Context, bail};
use chanbackup_rpc::{CompositeCredential, ConnectOptions, LndConnector};
use chanbackup_store::{S3StoreConfig, StoreConfig};
use chanbackup_sync::{EngineConfig, ObjectEncoding};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENDPOINT: &str = "localhost:10009";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// One node to mirror.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    pub tls_cert_path: PathBuf,

    pub macaroon_path: PathBuf,

    #[serde(default)]
    pub tls_domain: Option<String>,

    #[serde(default)]
    pub connect: ConnectOptions,
}

impl NodeConfig {
    /// Reads the credential files and builds a connector for this node.
    pub fn connector(&self) -> anyhow::Result<LndConnector> {
        let cert = std::fs::read(&self.tls_cert_path)
            .with_context(|| format!("reading TLS certificate {}", self.tls_cert_path.display()))?;
        let macaroon = std::fs::read(&self.macaroon_path)
            .with_context(|| format!("reading macaroon {}", self.macaroon_path.display()))?;
        let credential = CompositeCredential::assemble(&cert, &macaroon, self.tls_domain.as_deref())
            .with_context(|| format!("assembling credentials for {}", self.endpoint))?;
        Ok(LndConnector::new(self.endpoint.clone(), credential, self.connect.clone()))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub nodes: Vec<NodeConfig>,
    pub store: StoreConfig,
    pub engine: EngineConfig,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Config file (if any) with CLI flags applied on top, validated.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) -> anyhow::Result<()> {
        let node_flags = cli.endpoint.is_some()
            || cli.tls_cert.is_some()
            || cli.macaroon.is_some()
            || cli.tls_domain.is_some();

        if node_flags {
            match self.nodes.len() {
                0 => {
                    let (Some(tls_cert), Some(macaroon)) = (&cli.tls_cert, &cli.macaroon) else {
                        bail!("--tls-cert and --macaroon are required when no nodes are configured");
                    };
                    self.nodes.push(NodeConfig {
                        endpoint: cli.endpoint.clone().unwrap_or_else(default_endpoint),
                        tls_cert_path: tls_cert.clone(),
                        macaroon_path: macaroon.clone(),
                        tls_domain: cli.tls_domain.clone(),
                        connect: ConnectOptions::default(),
                    });
                }
                1 => {
                    let node = &mut self.nodes[0];
                    if let Some(endpoint) = &cli.endpoint {
                        node.endpoint = endpoint.clone();
                    }
                    if let Some(path) = &cli.tls_cert {
                        node.tls_cert_path = path.clone();
                    }
                    if let Some(path) = &cli.macaroon {
                        node.macaroon_path = path.clone();
                    }
                    if cli.tls_domain.is_some() {
                        node.tls_domain = cli.tls_domain.clone();
                    }
                }
                n => bail!("node flags cannot be combined with a config file listing {n} nodes"),
            }
        }

        if let Some(dir) = &cli.data_dir {
            self.store = StoreConfig::Filesystem { data_dir: dir.clone() };
        }

        let s3_flags = cli.bucket.is_some()
            || cli.region.is_some()
            || cli.s3_endpoint.is_some()
            || cli.key_prefix.is_some();
        if s3_flags {
            if !matches!(self.store, StoreConfig::S3(_)) {
                self.store = StoreConfig::S3(S3StoreConfig::default());
            }
            if let StoreConfig::S3(s3) = &mut self.store {
                if let Some(bucket) = &cli.bucket {
                    s3.bucket = bucket.clone();
                }
                if let Some(region) = &cli.region {
                    s3.region = region.clone();
                }
                if cli.s3_endpoint.is_some() {
                    s3.endpoint_override = cli.s3_endpoint.clone();
                }
                if cli.key_prefix.is_some() {
                    s3.key_prefix = cli.key_prefix.clone();
                }
            }
        }

        match cli.encoding.as_deref() {
            Some("raw") => self.engine.encoding = ObjectEncoding::Raw,
            Some("base64") => self.engine.encoding = ObjectEncoding::Base64,
            Some(other) => bail!("unknown encoding {other:?}"),
            None => {}
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.nodes.is_empty() {
            bail!("no nodes configured: pass --tls-cert and --macaroon or list nodes in --config");
        }

        let mut endpoints = HashSet::new();
        for node in &self.nodes {
            if node.endpoint.trim().is_empty() {
                bail!("node endpoint is empty");
            }
            if !endpoints.insert(node.endpoint.as_str()) {
                bail!("node {} is listed more than once", node.endpoint);
            }
        }

        match &self.store {
            StoreConfig::S3(s3) if s3.bucket.is_empty() => bail!("S3 bucket is empty"),
            StoreConfig::Filesystem { data_dir } if data_dir.as_os_str().is_empty() => {
                bail!("data_dir is empty")
            }
            _ => {}
        }

        self.engine.validate().context("engine settings")?;
        Ok(())
    }
}
