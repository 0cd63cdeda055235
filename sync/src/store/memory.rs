//! In-memory store.
//!
//! Keeps items, operations and errors in concurrent maps. Useful for tests and
//! for hosts that persist the queue through snapshots instead of SQLite.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use opqueue_engine::{item::Item, ErrorRecord, ItemId, OperationId, OperationRecord, TableName};

use super::{batch_ids, LocalStore, QueueStore, StoreResult};

/// Item store and operation log held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<(TableName, ItemId), Item>,
    operations: DashMap<OperationId, OperationRecord>,
    errors: DashMap<OperationId, ErrorRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of items stored for a table.
    pub fn item_count(&self, table: &str) -> usize {
        self.items.iter().filter(|entry| entry.key().0 == table).count()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn upsert(&self, table: &str, items: &[Item], allow_conflict_overwrite: bool) -> StoreResult<()> {
        for (id, item) in batch_ids(table, items, allow_conflict_overwrite)? {
            self.items
                .insert((table.to_string(), id.to_string()), item.clone());
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        self.items.remove(&(table.to_string(), id.to_string()));
        Ok(())
    }

    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Item>> {
        Ok(self
            .items
            .get(&(table.to_string(), id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn save_operation(&self, record: &OperationRecord) -> StoreResult<()> {
        self.operations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_operation(&self, id: &str) -> StoreResult<()> {
        self.operations.remove(id);
        Ok(())
    }

    async fn load_operations(&self) -> StoreResult<Vec<OperationRecord>> {
        let mut records: Vec<OperationRecord> = self
            .operations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| (record.sequence, record.created_at));
        Ok(records)
    }

    async fn save_error(&self, record: &ErrorRecord) -> StoreResult<()> {
        self.errors.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_errors(&self) -> StoreResult<Vec<ErrorRecord>> {
        let mut records: Vec<ErrorRecord> =
            self.errors.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn delete_errors(&self) -> StoreResult<()> {
        self.errors.clear();
        Ok(())
    }

    async fn delete_error(&self, id: &str) -> StoreResult<()> {
        self.errors.remove(id);
        Ok(())
    }
}
