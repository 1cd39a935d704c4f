//! chanbackupd: keeps remote copies of Lightning channel backups current.
//!
//! Runs one sync engine per configured node, all writing through a single
//! store. SIGINT/SIGTERM drain every engine; a fatal error in any engine
//! stops the rest and exits non-zero.

mod cli;
mod config;

use anyhow::Context;
use chanbackup_sync::{SyncHandle, create_sync_engine};
use clap::Parser;
use cli::Cli;
use config::DaemonConfig;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DaemonConfig::from_cli(&cli)?;
    let store = config
        .store
        .initialize()
        .await
        .context("initializing backup store")?;

    let mut handles = Vec::with_capacity(config.nodes.len());
    let mut engines = JoinSet::new();
    for node in &config.nodes {
        let connector = node.connector()?;
        let (handle, engine) = create_sync_engine(Arc::new(connector), store.clone(), config.engine.clone());
        handles.push(handle);

        let endpoint = node.endpoint.clone();
        engines.spawn(async move { (endpoint, engine.run().await) });
    }
    info!(
        "mirroring {} node(s) to {}",
        config.nodes.len(),
        store.describe()
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;
    let mut failure: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown, if !stopping => {
                info!("shutdown signal received, draining sync engines");
                stopping = true;
                stop_all(&handles).await;
            }
            joined = engines.join_next() => {
                let Some(joined) = joined else { break };
                let error = match joined {
                    Ok((endpoint, Ok(()))) => {
                        info!("sync engine for {endpoint} finished");
                        continue;
                    }
                    Ok((endpoint, Err(e))) => {
                        anyhow::Error::new(e).context(format!("sync engine for {endpoint}"))
                    }
                    Err(e) => anyhow::Error::new(e).context("sync engine task panicked"),
                };
                if failure.is_none() {
                    failure = Some(error);
                }
                if !stopping {
                    warn!("stopping remaining sync engines after a fatal error");
                    stopping = true;
                    stop_all(&handles).await;
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            info!("all sync engines stopped");
            Ok(())
        }
    }
}

async fn stop_all(handles: &[SyncHandle]) {
    for handle in handles {
        // Engines that already exited have closed their command channel.
        let _ = handle.stop().await;
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
