//! Per-item locks.
//!
//! A mutation and the push of an operation for the same item must not
//! interleave. Operations on different items never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use opqueue_engine::{ItemId, TableName};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard holding the lock of one item until dropped.
#[derive(Debug)]
pub struct ItemGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Async mutexes keyed by (table, item id).
#[derive(Debug, Default)]
pub struct ItemLocks {
    locks: DashMap<(TableName, ItemId), Arc<Mutex<()>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of an item.
    pub async fn acquire(&self, table: &str, item_id: &str) -> ItemGuard {
        // clone the Arc out so the map shard is not held across the await
        let lock = self
            .locks
            .entry((table.to_string(), item_id.to_string()))
            .or_default()
            .clone();

        ItemGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Drop locks nobody holds or waits on. Returns how many remain.
    pub fn prune(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
