//! Test doubles shared by the sync integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use opqueue_engine::{
    item::{into_item, item_id, Item},
    OperationKind,
};
use opqueue_sync::{
    DefaultSyncHandler, LocalStore, MemoryStore, RemoteError, RemoteTable, StoreError, StoreResult, SyncConfig,
    SyncContext, SyncHandler,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub type Response = Result<Option<Value>, RemoteError>;

pub fn item(id: &str, text: &str) -> Item {
    into_item(json!({"id": id, "text": text})).unwrap()
}

/// A call made to the remote.
#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub kind: OperationKind,
    pub table: String,
    pub item: Item,
}

/// Remote that records every call.
///
/// Responses can be scripted per item id; unscripted calls echo the item back
/// with server system properties added.
#[derive(Default)]
pub struct RecordingRemote {
    calls: Mutex<Vec<RemoteCall>>,
    scripted: Mutex<HashMap<String, VecDeque<Response>>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote whose calls signal `started` and then wait for `release`.
    pub fn gated(started: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            gate: Some((started, release)),
            ..Self::default()
        }
    }

    /// Queue a response for the next call about `item_id`.
    pub fn respond(&self, item_id: &str, response: Response) {
        self.scripted
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn fail(&self, item_id: &str, status: u16, body: Value) {
        self.respond(
            item_id,
            Err(RemoteError::Status {
                status,
                body: Some(body.to_string()),
            }),
        );
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn call(&self, kind: OperationKind, table: &str, item: &Item) -> Response {
        self.calls.lock().unwrap().push(RemoteCall {
            kind,
            table: table.to_string(),
            item: item.clone(),
        });

        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }

        let id = item_id(item).unwrap_or_default().to_string();
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response;
        }

        match kind {
            OperationKind::Delete => Ok(None),
            _ => {
                let mut echoed = item.clone();
                echoed.insert("__version".into(), json!("server-v1"));
                echoed.insert("__updatedAt".into(), json!("2024-01-01T00:00:00Z"));
                Ok(Some(Value::Object(echoed)))
            }
        }
    }
}

#[async_trait]
impl RemoteTable for RecordingRemote {
    async fn insert(&self, table: &str, item: &Item) -> Response {
        self.call(OperationKind::Insert, table, item).await
    }

    async fn update(&self, table: &str, item: &Item) -> Response {
        self.call(OperationKind::Update, table, item).await
    }

    async fn delete(&self, table: &str, item: &Item) -> Response {
        self.call(OperationKind::Delete, table, item).await
    }
}

/// A write made to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Upsert {
        table: String,
        items: Vec<Item>,
        allow_conflict_overwrite: bool,
    },
    Delete {
        table: String,
        id: String,
    },
}

/// Local store that records writes and can be told to fail them.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<StoreWrite>>,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Corrupt("disk full".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for RecordingStore {
    async fn upsert(&self, table: &str, items: &[Item], allow_conflict_overwrite: bool) -> StoreResult<()> {
        self.writes.lock().unwrap().push(StoreWrite::Upsert {
            table: table.to_string(),
            items: items.to_vec(),
            allow_conflict_overwrite,
        });
        self.check()?;
        self.inner.upsert(table, items, allow_conflict_overwrite).await
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        self.writes.lock().unwrap().push(StoreWrite::Delete {
            table: table.to_string(),
            id: id.to_string(),
        });
        self.check()?;
        self.inner.delete(table, id).await
    }

    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        self.inner.lookup(table, id).await
    }
}

/// Everything a test needs to drive and observe a context.
pub struct Harness {
    pub context: SyncContext,
    pub local: Arc<RecordingStore>,
    pub log: Arc<MemoryStore>,
    pub remote: Arc<RecordingRemote>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(RecordingRemote::new(), None, SyncConfig::default()).await
    }

    pub async fn with_remote(remote: RecordingRemote) -> Self {
        Self::build(remote, None, SyncConfig::default()).await
    }

    pub async fn with_handler(handler: Arc<dyn SyncHandler>) -> Self {
        Self::build(RecordingRemote::new(), Some(handler), SyncConfig::default()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        Self::build(RecordingRemote::new(), None, config).await
    }

    pub async fn build(
        remote: RecordingRemote,
        handler: Option<Arc<dyn SyncHandler>>,
        config: SyncConfig,
    ) -> Self {
        let local = Arc::new(RecordingStore::new());
        let log = MemoryStore::new_shared();
        let remote = Arc::new(remote);
        let handler =
            handler.unwrap_or_else(|| Arc::new(DefaultSyncHandler) as Arc<dyn SyncHandler>);

        let context = SyncContext::new(local.clone(), log.clone(), remote.clone(), handler, config);
        context.initialize().await.unwrap();

        Self {
            context,
            local,
            log,
            remote,
        }
    }
}
