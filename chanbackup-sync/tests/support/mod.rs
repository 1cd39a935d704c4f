//! Scripted backup source and fault-injecting store for engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chanbackup_rpc::{BackupSource, RpcError, RpcResult, SnapshotStream, SourceConnector};
use chanbackup_store::{BackupStore, MemoryStore, StoreError, StoreResult};
use chanbackup_sync::{BackoffConfig, EngineConfig, EngineStatus, ObjectEncoding, SyncHandle};
use chanbackup_types::{BackupSnapshot, NodeIdentity};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Ordered record of source and store operations.
#[derive(Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn push(&self, op: impl Into<String>) {
        self.0.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.ops().into_iter().filter(|op| op.starts_with("put ")).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| o.as_str() == op).count()
    }
}

pub fn snapshot(single: &str, multi: &str) -> BackupSnapshot {
    BackupSnapshot::new(single.as_bytes(), multi.as_bytes())
}

struct Feed {
    subscriber: Option<mpsc::UnboundedSender<RpcResult<BackupSnapshot>>>,
    closed: bool,
}

type SharedFeed = Arc<Mutex<Feed>>;

/// Backup changes as the node publishes them: delivered only to a live
/// subscription, never buffered for a later one. Dropping the sender ends
/// the subscription.
pub struct UpdateSender {
    feed: SharedFeed,
}

impl UpdateSender {
    /// Returns whether a subscriber received the update.
    pub fn publish(&self, update: RpcResult<BackupSnapshot>) -> bool {
        publish(&self.feed, update)
    }
}

impl Drop for UpdateSender {
    fn drop(&mut self) {
        let mut feed = self.feed.lock().unwrap();
        feed.closed = true;
        feed.subscriber = None;
    }
}

fn publish(feed: &SharedFeed, update: RpcResult<BackupSnapshot>) -> bool {
    match &feed.lock().unwrap().subscriber {
        Some(subscriber) => subscriber.send(update).is_ok(),
        None => false,
    }
}

enum ExportStep {
    Fail(RpcError),
    Return(BackupSnapshot),
    Hang,
}

/// What one connect attempt yields.
pub struct SessionScript {
    identity: String,
    baseline: BackupSnapshot,
    exports: VecDeque<ExportStep>,
    publish_during_export: Option<BackupSnapshot>,
    feed: SharedFeed,
}

impl SessionScript {
    /// Exports return `baseline` once the scripted steps run out. Updates
    /// are published through the returned sender.
    pub fn new(identity: &str, baseline: BackupSnapshot) -> (Self, UpdateSender) {
        let feed = Arc::new(Mutex::new(Feed {
            subscriber: None,
            closed: false,
        }));
        let script = Self {
            identity: identity.to_string(),
            baseline,
            exports: VecDeque::new(),
            publish_during_export: None,
            feed: feed.clone(),
        };
        (script, UpdateSender { feed })
    }

    pub fn fail_export(mut self, error: RpcError) -> Self {
        self.exports.push_back(ExportStep::Fail(error));
        self
    }

    /// The next export returns `snapshot` instead of the baseline.
    pub fn export_first(mut self, snapshot: BackupSnapshot) -> Self {
        self.exports.push_back(ExportStep::Return(snapshot));
        self
    }

    /// The next export never completes.
    pub fn hang_export(mut self) -> Self {
        self.exports.push_back(ExportStep::Hang);
        self
    }

    /// The node publishes `snapshot` while the first export is in flight.
    pub fn publish_during_export(mut self, snapshot: BackupSnapshot) -> Self {
        self.publish_during_export = Some(snapshot);
        self
    }
}

enum ConnectStep {
    Fail(RpcError),
    Session(SessionScript),
}

/// Hands out scripted sessions in order. Once the script runs out every
/// connect fails with `Unavailable`.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<ConnectStep>>,
    connects: AtomicUsize,
    log: OpLog,
}

impl ScriptedConnector {
    pub fn new(log: OpLog) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            log,
        })
    }

    pub fn session(&self, script: SessionScript) {
        self.steps.lock().unwrap().push_back(ConnectStep::Session(script));
    }

    pub fn fail(&self, error: RpcError) {
        self.steps.lock().unwrap().push_back(ConnectStep::Fail(error));
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn connect(&self) -> RpcResult<Box<dyn BackupSource>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.push("connect");
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ConnectStep::Fail(error)) => Err(error),
            Some(ConnectStep::Session(script)) => Ok(Box::new(ScriptedSource {
                identity: script.identity,
                baseline: script.baseline,
                exports: Mutex::new(script.exports),
                publish_during_export: Mutex::new(script.publish_during_export),
                feed: script.feed,
                log: self.log.clone(),
            })),
            None => Err(unavailable("script exhausted")),
        }
    }

    fn endpoint(&self) -> &str {
        "scripted:10009"
    }
}

struct ScriptedSource {
    identity: String,
    baseline: BackupSnapshot,
    exports: Mutex<VecDeque<ExportStep>>,
    publish_during_export: Mutex<Option<BackupSnapshot>>,
    feed: SharedFeed,
    log: OpLog,
}

#[async_trait]
impl BackupSource for ScriptedSource {
    async fn identity(&self) -> RpcResult<NodeIdentity> {
        Ok(NodeIdentity::new(self.identity.clone()))
    }

    async fn export_all_backups(&self) -> RpcResult<BackupSnapshot> {
        self.log.push("export");
        let concurrent = self.publish_during_export.lock().unwrap().take();
        if let Some(update) = concurrent {
            publish(&self.feed, Ok(update));
        }

        let step = self.exports.lock().unwrap().pop_front();
        match step {
            Some(ExportStep::Fail(error)) => Err(error),
            Some(ExportStep::Return(snapshot)) => Ok(snapshot),
            Some(ExportStep::Hang) => futures::future::pending().await,
            None => Ok(self.baseline.clone()),
        }
    }

    async fn subscribe_backups(&self) -> RpcResult<SnapshotStream> {
        self.log.push("subscribe");
        let mut feed = self.feed.lock().unwrap();
        if feed.subscriber.is_some() {
            return Err(unavailable("already subscribed"));
        }
        if feed.closed {
            return Ok(futures::stream::empty().boxed());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        feed.subscriber = Some(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub fn unavailable(message: &str) -> RpcError {
    RpcError::Status(tonic::Status::unavailable(message))
}

/// MemoryStore that fails puts of chosen payloads and logs every put.
pub struct FaultyStore {
    inner: MemoryStore,
    failures: Mutex<HashMap<Vec<u8>, u32>>,
    log: OpLog,
}

impl FaultyStore {
    pub fn new(log: OpLog) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failures: Mutex::new(HashMap::new()),
            log,
        })
    }

    /// The next `times` puts whose body equals `payload` fail.
    pub fn fail_payload(&self, payload: &[u8], times: u32) {
        self.failures.lock().unwrap().insert(payload.to_vec(), times);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

#[async_trait]
impl BackupStore for FaultyStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let op = format!("put {key}={}", String::from_utf8_lossy(&bytes));
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&bytes) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            self.log.push(format!("{op} FAILED"));
            return Err(StoreError::S3("injected failure".into()));
        }
        self.log.push(op);
        self.inner.put(key, bytes).await
    }

    fn describe(&self) -> String {
        "faulty-memory".to_string()
    }
}

/// Short delays; tests also run with a paused clock.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        bootstrap_backoff: BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1), Some(3)),
        write_backoff: BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1), Some(5)),
        reconnect_backoff: BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1), None),
        idle_timeout_secs: None,
        encoding: ObjectEncoding::Raw,
    }
}

pub async fn wait_until(handle: &SyncHandle, predicate: impl FnMut(&EngineStatus) -> bool) -> EngineStatus {
    let mut status = handle.status();
    let current = status
        .wait_for(predicate)
        .await
        .expect("engine exited before reaching the expected status");
    current.clone()
}

/// Yields until `op` shows up in the log.
pub async fn wait_for_op(log: &OpLog, op: &str) {
    while log.count(op) == 0 {
        tokio::task::yield_now().await;
    }
}

pub const SINGLE_KEY: &str = "node123.SingleChanBackups.bak";
pub const MULTI_KEY: &str = "node123.MultiChanBackup.bak";

pub fn put(key: &str, payload: &str) -> String {
    format!("put {key}={payload}")
}

pub fn failed_put(key: &str, payload: &str) -> String {
    format!("put {key}={payload} FAILED")
}
