//! The sync context: the entry point applications mutate data through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opqueue_engine::{
    item::{item_id, Item},
    Enqueued, Error, Operation, OperationError, OperationKind, OperationQueue, OperationRecord,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::SyncConfig,
    error::{StoreError, SyncError},
    handler::{DefaultSyncHandler, SyncHandler},
    locks::ItemLocks,
    remote::RemoteTable,
    store::{LocalStore, QueueStore},
    Result,
};

/// Local data access with queued replay to the remote.
///
/// Every mutation is applied to the local store right away and queued for
/// the next push. Mutations and pushes of the same item are serialized by a
/// per-item lock; the queue itself is only locked for in-memory bookkeeping.
pub struct SyncContext {
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) queue_store: Arc<dyn QueueStore>,
    pub(crate) remote: Arc<dyn RemoteTable>,
    pub(crate) handler: Arc<dyn SyncHandler>,
    pub(crate) config: SyncConfig,
    pub(crate) queue: Mutex<OperationQueue>,
    pub(crate) locks: ItemLocks,
    pub(crate) push_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl SyncContext {
    /// Create a context. Call [`SyncContext::initialize`] before use.
    pub fn new(
        local: Arc<dyn LocalStore>,
        queue_store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteTable>,
        handler: Arc<dyn SyncHandler>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            queue_store,
            remote,
            handler,
            config,
            queue: Mutex::new(OperationQueue::new()),
            locks: ItemLocks::new(),
            push_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a context with the default handler and configuration.
    pub fn with_defaults(
        local: Arc<dyn LocalStore>,
        queue_store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteTable>,
    ) -> Self {
        Self::new(
            local,
            queue_store,
            remote,
            Arc::new(DefaultSyncHandler),
            SyncConfig::default(),
        )
    }

    /// Load the persisted operation log into the queue.
    ///
    /// Records that change while loading (reassigned sequences, operations
    /// collapsed away) are written back. Calling this again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut queue = self.queue.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let records = self.queue_store.load_operations().await?;
        let loaded = OperationQueue::from_records(records.iter().cloned())?;

        let mut stale: HashMap<String, OperationRecord> = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let mut rewritten = 0;
        for record in loaded.records() {
            if stale.remove(&record.id).as_ref() != Some(&record) {
                self.queue_store.save_operation(&record).await?;
                rewritten += 1;
            }
        }
        for id in stale.keys() {
            self.queue_store.delete_operation(id).await?;
        }

        info!(
            pending = loaded.len(),
            rewritten,
            dropped = stale.len(),
            "Operation queue loaded"
        );

        *queue = loaded;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Insert an item locally and queue it for the remote.
    pub async fn insert(&self, table: &str, item: Item) -> Result<Enqueued> {
        self.mutate(OperationKind::Insert, table, item).await
    }

    /// Update an item locally and queue it for the remote.
    pub async fn update(&self, table: &str, item: Item) -> Result<Enqueued> {
        self.mutate(OperationKind::Update, table, item).await
    }

    /// Delete an item locally and queue the delete for the remote.
    ///
    /// The item is kept on the operation so its `__version` reaches the
    /// remote.
    pub async fn delete(&self, table: &str, item: Item) -> Result<Enqueued> {
        self.mutate(OperationKind::Delete, table, item).await
    }

    async fn mutate(&self, kind: OperationKind, table: &str, item: Item) -> Result<Enqueued> {
        self.ensure_initialized()?;

        let id = item_id(&item)
            .ok_or_else(|| StoreError::MissingId {
                table: table.to_string(),
            })?
            .to_string();

        let _guard = self.locks.acquire(table, &id).await;

        // reject before touching the local store
        self.queue.lock().await.validate(kind, table, &id)?;

        match kind {
            OperationKind::Insert | OperationKind::Update => {
                self.local.upsert(table, &[item.clone()], true).await?
            }
            OperationKind::Delete => self.local.delete(table, &id).await?,
        }

        let op = Operation::new(
            Uuid::new_v4().to_string(),
            kind,
            table,
            id.as_str(),
            Some(item),
            now_millis(),
        );

        let (outcome, live) = {
            let mut queue = self.queue.lock().await;
            let outcome = queue.enqueue(op)?;
            let live = outcome
                .live_id()
                .and_then(|live_id| queue.get(live_id))
                .map(Operation::to_record);
            queue.compact();
            (outcome, live)
        };

        // save the survivor first so a crash in between leaves a log that
        // collapses again on load
        if let Some(record) = &live {
            self.queue_store.save_operation(record).await?;
        }
        if let Some(cancelled) = outcome.cancelled_id() {
            self.queue_store.delete_operation(cancelled).await?;
        }
        // the collapsed operation's stored failure is stale
        if let Some(existing) = outcome.collapsed_id() {
            self.queue_store.delete_error(existing).await?;
        }

        debug!(table = %table, item_id = %id, kind = %kind, outcome = ?outcome, "Operation queued");
        Ok(outcome)
    }

    /// Read an item from the local store.
    pub async fn lookup(&self, table: &str, id: &str) -> Result<Option<Item>> {
        Ok(self.local.lookup(table, id).await?)
    }

    /// Live operations in push order.
    pub async fn pending_operations(&self) -> Vec<Operation> {
        self.queue.lock().await.pending().cloned().collect()
    }

    /// Number of live operations against a table.
    pub async fn count_pending(&self, table: &str) -> usize {
        self.queue.lock().await.count_pending(table)
    }

    /// Resolve a failed operation by dropping it and storing `item` locally.
    ///
    /// Typically `item` is the server's version of the record taken from
    /// [`OperationError::result`].
    pub async fn cancel_and_update_item(&self, error: &OperationError, item: Item) -> Result<()> {
        let (table, _) = self.cancel_operation(error).await?;
        self.local.upsert(&table, &[item], true).await?;
        Ok(())
    }

    /// Resolve a failed operation by dropping it and deleting the item locally.
    pub async fn cancel_and_discard_item(&self, error: &OperationError) -> Result<()> {
        let (table, item_id) = self.cancel_operation(error).await?;
        self.local.delete(&table, &item_id).await?;
        Ok(())
    }

    /// Remove the operation an error refers to, unless it has been revised
    /// since. Returns its table and item id.
    async fn cancel_operation(&self, error: &OperationError) -> Result<(String, String)> {
        self.ensure_initialized()?;

        let item_id = self
            .queue
            .lock()
            .await
            .get(&error.id)
            .map(|op| op.item_id().clone())
            .ok_or_else(|| Error::OperationNotFound(error.id.clone()))?;
        let _guard = self.locks.acquire(&error.table_name, &item_id).await;

        self.queue
            .lock()
            .await
            .remove_if_version(&error.id, error.operation_version)?;
        self.queue_store.delete_operation(&error.id).await?;
        self.queue_store.delete_error(&error.id).await?;

        info!(op_id = %error.id, table = %error.table_name, "Operation cancelled");
        Ok((error.table_name.clone(), item_id))
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
