//! Local persistence: item storage and the durable operation log.

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use crate::error::StoreError;
use async_trait::async_trait;
use opqueue_engine::{item::Item, ErrorRecord, OperationRecord};
use std::collections::HashSet;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// On-device item storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or replace items.
    ///
    /// With `allow_conflict_overwrite` unset, a batch naming the same id twice
    /// fails with [`StoreError::Conflict`] and nothing is written.
    async fn upsert(&self, table: &str, items: &[Item], allow_conflict_overwrite: bool) -> StoreResult<()>;

    /// Delete an item. Deleting a missing item is not an error.
    async fn delete(&self, table: &str, id: &str) -> StoreResult<()>;

    async fn lookup(&self, table: &str, id: &str) -> StoreResult<Option<Item>>;
}

/// Durable storage for queued operations and push errors.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert or replace an operation record by id.
    async fn save_operation(&self, record: &OperationRecord) -> StoreResult<()>;

    async fn delete_operation(&self, id: &str) -> StoreResult<()>;

    /// All operation records, ordered by sequence then creation time.
    async fn load_operations(&self) -> StoreResult<Vec<OperationRecord>>;

    /// Insert or replace an error record by operation id.
    async fn save_error(&self, record: &ErrorRecord) -> StoreResult<()>;

    async fn load_errors(&self) -> StoreResult<Vec<ErrorRecord>>;

    /// Delete all error records.
    async fn delete_errors(&self) -> StoreResult<()>;

    async fn delete_error(&self, id: &str) -> StoreResult<()>;
}

/// Extract the ids of a batch and apply the conflict rule.
pub(crate) fn batch_ids<'a>(
    table: &str,
    items: &'a [Item],
    allow_conflict_overwrite: bool,
) -> StoreResult<Vec<(&'a str, &'a Item)>> {
    let mut seen = HashSet::new();
    let mut batch = Vec::with_capacity(items.len());

    for item in items {
        let id = opqueue_engine::item::item_id(item).ok_or_else(|| StoreError::MissingId {
            table: table.to_string(),
        })?;

        if !seen.insert(id) && !allow_conflict_overwrite {
            return Err(StoreError::Conflict {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        batch.push((id, item));
    }

    Ok(batch)
}
