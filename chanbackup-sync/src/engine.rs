//! Sync engine: mirrors one node's channel backups into a store.
//!
//! Lifecycle:
//! - `Connecting`: open a session and pin the node identity
//! - `Bootstrapping`: subscribe, then export and persist a full baseline
//! - `Streaming`: persist each update before reading the next
//! - `Reconnecting`: after the session is lost; loops back to `Connecting`
//! - `Draining` / `Terminated`: after a stop command

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::writer::{SnapshotWriter, describe_failures};
use chanbackup_rpc::{BackupSource, RpcError, RpcResult, SnapshotStream, SourceConnector};
use chanbackup_store::BackupStore;
use chanbackup_types::{BackupPart, BackupSnapshot, NodeIdentity, SnapshotDigest};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Connecting,
    Bootstrapping,
    Streaming,
    Reconnecting,
    Draining,
    Terminated,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Connecting => "connecting",
            EngineState::Bootstrapping => "bootstrapping",
            EngineState::Streaming => "streaming",
            EngineState::Reconnecting => "reconnecting",
            EngineState::Draining => "draining",
            EngineState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// The most recent snapshot whose two halves are both stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenSnapshot {
    pub digest: SnapshotDigest,
    pub size: usize,
    pub written_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct EngineStatus {
    pub state: EngineState,
    pub identity: Option<NodeIdentity>,
    /// Snapshots fully persisted, baselines included.
    pub snapshots_written: u64,
    /// Individual puts that failed and were retried.
    pub failed_writes: u64,
    /// Successful reconnects.
    pub reconnects: u64,
    pub last_written: Option<WrittenSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncCommand {
    /// Finish the in-flight write and shut down.
    Stop,
    /// Export and persist a fresh baseline.
    Resync,
}

/// Handle for controlling and observing a running engine.
///
/// Dropping every handle stops the engine, as a stop command would.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    status_rx: watch::Receiver<EngineStatus>,
}

impl SyncHandle {
    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn resync(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Resync)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    pub fn state(&self) -> EngineState {
        self.status_rx.borrow().state
    }
}

pub struct SyncEngine {
    connector: Arc<dyn SourceConnector>,
    writer: SnapshotWriter,
    config: EngineConfig,
    command_rx: mpsc::Receiver<SyncCommand>,
    status_tx: watch::Sender<EngineStatus>,
    /// Pinned on the first successful connect.
    identity: Option<NodeIdentity>,
    resync_requested: bool,
}

/// Creates a sync engine and its handle. The engine does nothing until
/// [`SyncEngine::run`] is awaited.
pub fn create_sync_engine(
    connector: Arc<dyn SourceConnector>,
    store: Arc<dyn BackupStore>,
    config: EngineConfig,
) -> (SyncHandle, SyncEngine) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(EngineStatus::default());

    let handle = SyncHandle {
        command_tx,
        status_rx,
    };

    let engine = SyncEngine {
        connector,
        writer: SnapshotWriter::new(store, config.encoding),
        config,
        command_rx,
        status_tx,
        identity: None,
        resync_requested: false,
    };

    (handle, engine)
}

type Session = (Box<dyn BackupSource>, NodeIdentity);

/// What the caller should do next.
enum Flow {
    /// Move on: next phase, next update, or a fresh baseline after a resync.
    Continue,
    Stopped,
    Lost(RpcError),
}

enum SessionEnd {
    Stopped,
    Lost(RpcError),
}

enum Pause {
    Elapsed,
    Resync,
    Stop,
}

enum ConnectFailure {
    Rpc(RpcError),
    Fatal(SyncError),
}

impl SyncEngine {
    /// Runs until stopped or a fatal error. Transient failures are retried
    /// internally and only logged.
    pub async fn run(mut self) -> SyncResult<()> {
        let endpoint = self.connector.endpoint().to_string();
        info!("sync engine started for {endpoint}");

        let result = self.drive().await;
        self.set_state(EngineState::Terminated);

        match &result {
            Ok(()) => info!("sync engine for {endpoint} stopped"),
            Err(e) => error!("sync engine for {endpoint} failed: {e}"),
        }
        result
    }

    async fn drive(&mut self) -> SyncResult<()> {
        self.config.validate()?;

        self.set_state(EngineState::Connecting);
        let mut session = match self.open_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.set_state(EngineState::Draining);
                return Ok(());
            }
            Err(ConnectFailure::Fatal(e)) => return Err(e),
            Err(ConnectFailure::Rpc(source)) => {
                return Err(SyncError::Connect {
                    endpoint: self.connector.endpoint().to_string(),
                    source,
                });
            }
        };

        loop {
            let end = self.run_session(session.0.as_ref(), &session.1).await?;
            match end {
                SessionEnd::Stopped => {
                    self.set_state(EngineState::Draining);
                    drop(session);
                    return Ok(());
                }
                SessionEnd::Lost(e) => {
                    warn!("lost session with {}: {e}", self.connector.endpoint());
                    drop(session);
                    session = match self.reconnect(e).await? {
                        Some(session) => session,
                        None => {
                            self.set_state(EngineState::Draining);
                            return Ok(());
                        }
                    };
                }
            }
        }
    }

    /// Connects and pins the identity. `None` means a stop command arrived
    /// first.
    async fn open_session(&mut self) -> Result<Option<Session>, ConnectFailure> {
        let connector = self.connector.clone();
        let connecting = async {
            let source = connector.connect().await?;
            let identity = source.identity().await?;
            Ok::<_, RpcError>((source, identity))
        };
        let Some(connected) = self.interruptible(connecting).await else {
            return Ok(None);
        };
        let (source, identity) = connected.map_err(ConnectFailure::Rpc)?;
        if identity.is_empty() {
            return Err(ConnectFailure::Rpc(RpcError::EmptyIdentity));
        }

        match &self.identity {
            Some(expected) if *expected != identity => {
                return Err(ConnectFailure::Fatal(SyncError::IdentityMismatch {
                    expected: expected.clone(),
                    actual: identity,
                }));
            }
            Some(_) => {}
            None => {
                self.identity = Some(identity.clone());
                let pinned = identity.clone();
                self.status_tx.send_modify(|status| status.identity = Some(pinned));
            }
        }

        info!("connected to {} as {identity}", self.connector.endpoint());
        Ok(Some((source, identity)))
    }

    async fn run_session(
        &mut self,
        source: &dyn BackupSource,
        identity: &NodeIdentity,
    ) -> SyncResult<SessionEnd> {
        self.set_state(EngineState::Bootstrapping);
        // Opened before the baseline export and read only after it is
        // stored. Kept across resyncs.
        let mut subscription = match self.interruptible(source.subscribe_backups()).await {
            None => return Ok(SessionEnd::Stopped),
            Some(Ok(stream)) => stream,
            Some(Err(e)) if e.is_transient() => return Ok(SessionEnd::Lost(e)),
            Some(Err(e)) => return Err(e.into()),
        };

        loop {
            match self.bootstrap(source, identity).await? {
                Flow::Continue => {}
                Flow::Stopped => return Ok(SessionEnd::Stopped),
                Flow::Lost(e) => return Ok(SessionEnd::Lost(e)),
            }

            self.set_state(EngineState::Streaming);
            match self.stream_updates(&mut subscription, identity).await? {
                Flow::Continue => {
                    info!("re-exporting baseline for {identity}");
                    self.set_state(EngineState::Bootstrapping);
                }
                Flow::Stopped => return Ok(SessionEnd::Stopped),
                Flow::Lost(e) => return Ok(SessionEnd::Lost(e)),
            }
        }
    }

    /// Exports and persists a full baseline, re-exporting on each retry.
    async fn bootstrap(&mut self, source: &dyn BackupSource, identity: &NodeIdentity) -> SyncResult<Flow> {
        let mut schedule = self.config.bootstrap_backoff.schedule();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            // A baseline exported from here on satisfies any pending resync.
            self.resync_requested = false;
            let snapshot = match self.interruptible(source.export_all_backups()).await {
                None => return Ok(Flow::Stopped),
                Some(Ok(snapshot)) => snapshot,
                Some(Err(e)) if e.is_transient() => return Ok(Flow::Lost(e)),
                Some(Err(e)) => return Err(e.into()),
            };
            debug!("exported baseline for {identity}: {snapshot:?}");

            let outcome = self.writer.write(identity, &snapshot).await;
            if outcome.is_success() {
                self.record_written(identity, &snapshot);
                return Ok(Flow::Continue);
            }

            let pending = outcome.failed_parts();
            let last_error = outcome.to_string();
            self.record_failures(pending.len());

            let Some(delay) = schedule.next() else {
                return Err(SyncError::BootstrapExhausted {
                    identity: identity.clone(),
                    attempts,
                    last_error,
                });
            };
            warn!("baseline for {identity} incomplete ({last_error}), retrying in {delay:?}");

            match self.pause(delay).await {
                Pause::Elapsed | Pause::Resync => {}
                Pause::Stop => return self.final_attempt(identity, &snapshot, &pending).await,
            }
        }
    }

    async fn stream_updates(&mut self, stream: &mut SnapshotStream, identity: &NodeIdentity) -> SyncResult<Flow> {
        let idle_timeout = self.config.idle_timeout();

        loop {
            if std::mem::take(&mut self.resync_requested) {
                return Ok(Flow::Continue);
            }

            let update = tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(SyncCommand::Resync) => return Ok(Flow::Continue),
                    Some(SyncCommand::Stop) | None => return Ok(Flow::Stopped),
                },
                update = next_update(stream, idle_timeout) => update,
            };

            let snapshot = match update {
                Ok(snapshot) => snapshot,
                Err(e) => return Ok(Flow::Lost(e)),
            };
            debug!("backup update for {identity}: {snapshot:?}");

            if let Flow::Stopped = self.persist(identity, &snapshot).await? {
                return Ok(Flow::Stopped);
            }
        }
    }

    /// Writes a streamed snapshot, retrying only the halves that failed.
    /// Returns only once both halves are stored.
    async fn persist(&mut self, identity: &NodeIdentity, snapshot: &BackupSnapshot) -> SyncResult<Flow> {
        let outcome = self.writer.write(identity, snapshot).await;
        if outcome.is_success() {
            self.record_written(identity, snapshot);
            return Ok(Flow::Continue);
        }

        let mut pending = outcome.failed_parts();
        let mut last_error = outcome.to_string();
        self.record_failures(pending.len());
        let mut schedule = self.config.write_backoff.schedule();

        loop {
            let Some(delay) = schedule.next() else {
                return Err(SyncError::WriteExhausted {
                    identity: identity.clone(),
                    attempts: schedule.attempts() + 1,
                    last_error,
                });
            };
            warn!(
                "snapshot {} for {identity} incomplete ({last_error}), retrying {} in {delay:?}",
                snapshot.digest().short(),
                describe_parts(&pending)
            );

            match self.pause(delay).await {
                Pause::Elapsed => {}
                Pause::Resync => self.resync_requested = true,
                Pause::Stop => return self.final_attempt(identity, snapshot, &pending).await,
            }

            let failures = self.writer.write_parts(identity, snapshot, &pending).await;
            if failures.is_empty() {
                self.record_written(identity, snapshot);
                return Ok(Flow::Continue);
            }

            self.record_failures(failures.len());
            pending = failures.iter().map(|(part, _)| *part).collect();
            last_error = describe_failures(&failures);
        }
    }

    /// One immediate attempt at the outstanding halves after a stop command.
    async fn final_attempt(
        &mut self,
        identity: &NodeIdentity,
        snapshot: &BackupSnapshot,
        pending: &[BackupPart],
    ) -> SyncResult<Flow> {
        info!(
            "stop requested with {} backup of {identity} pending, making a final attempt",
            describe_parts(pending)
        );

        let failures = self.writer.write_parts(identity, snapshot, pending).await;
        if failures.is_empty() {
            self.record_written(identity, snapshot);
            return Ok(Flow::Stopped);
        }

        self.record_failures(failures.len());
        let failed: Vec<BackupPart> = failures.iter().map(|(part, _)| *part).collect();
        Err(SyncError::IncompleteOnShutdown {
            identity: identity.clone(),
            pending: describe_parts(&failed),
            last_error: describe_failures(&failures),
        })
    }

    /// Reconnects with backoff. `None` means a stop command arrived first.
    async fn reconnect(&mut self, cause: RpcError) -> SyncResult<Option<Session>> {
        let endpoint = self.connector.endpoint().to_string();
        let mut schedule = self.config.reconnect_backoff.schedule();
        let mut last_error = cause.to_string();

        loop {
            self.set_state(EngineState::Reconnecting);
            let Some(delay) = schedule.next() else {
                return Err(SyncError::ReconnectExhausted {
                    endpoint,
                    attempts: schedule.attempts(),
                    last_error,
                });
            };
            info!("reconnecting to {endpoint} in {delay:?}");

            if let Pause::Stop = self.pause(delay).await {
                return Ok(None);
            }

            self.set_state(EngineState::Connecting);
            match self.open_session().await {
                Ok(Some(session)) => {
                    self.status_tx.send_modify(|status| status.reconnects += 1);
                    return Ok(Some(session));
                }
                Ok(None) => return Ok(None),
                Err(ConnectFailure::Fatal(e)) => return Err(e),
                Err(ConnectFailure::Rpc(e)) if e.is_transient() => {
                    warn!("reconnect to {endpoint} failed: {e}");
                    last_error = e.to_string();
                }
                Err(ConnectFailure::Rpc(source)) => return Err(SyncError::Connect { endpoint, source }),
            }
        }
    }

    /// Sleeps for `delay` unless a command arrives first. A resync cuts the
    /// delay short.
    async fn pause(&mut self, delay: Duration) -> Pause {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Pause::Elapsed,
            command = self.command_rx.recv() => match command {
                Some(SyncCommand::Resync) => Pause::Resync,
                Some(SyncCommand::Stop) | None => Pause::Stop,
            },
        }
    }

    /// Awaits an RPC unless a stop command arrives first, in which case the
    /// call is abandoned and `None` returned. A resync is remembered.
    async fn interruptible<T>(&mut self, call: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(call);
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(SyncCommand::Resync) => self.resync_requested = true,
                    Some(SyncCommand::Stop) | None => return None,
                },
                output = &mut call => return Some(output),
            }
        }
    }

    fn set_state(&self, state: EngineState) {
        let changed = self.status_tx.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
        if changed {
            info!("sync engine for {}: {state}", self.connector.endpoint());
        }
    }

    fn record_written(&self, identity: &NodeIdentity, snapshot: &BackupSnapshot) {
        let digest = snapshot.digest();
        info!(
            "persisted snapshot {} for {identity} (single {} bytes, multi {} bytes)",
            digest.short(),
            snapshot.part(BackupPart::SingleChannel).len(),
            snapshot.part(BackupPart::MultiChannel).len()
        );
        let written = WrittenSnapshot {
            digest,
            size: snapshot.size(),
            written_at: Utc::now(),
        };
        self.status_tx.send_modify(|status| {
            status.snapshots_written += 1;
            status.last_written = Some(written);
        });
    }

    fn record_failures(&self, count: usize) {
        self.status_tx
            .send_modify(|status| status.failed_writes += count as u64);
    }
}

async fn next_update(stream: &mut SnapshotStream, idle_timeout: Option<Duration>) -> RpcResult<BackupSnapshot> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| RpcError::IdleTimeout(limit))?,
        None => stream.next().await,
    };
    next.unwrap_or(Err(RpcError::StreamClosed))
}

fn describe_parts(parts: &[BackupPart]) -> String {
    parts
        .iter()
        .map(BackupPart::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}
