//! The operation queue.
//!
//! The queue is an arena of operations keyed by their sequence number, plus
//! two indexes: operation id to sequence, and (table, item id) to the
//! sequence of the one live operation for that item. Collapsing mutates one
//! arena entry and cancels another without holding references into both.

use crate::{
    error::Result, record::OperationRecord, snapshot::SNAPSHOT_FORMAT_VERSION, Collapse, Error,
    ItemId, Operation, OperationId, OperationKind, QueueSnapshot, Sequence, TableName, Version,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

type ItemKey = (TableName, ItemId);

/// Result of enqueuing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Enqueued {
    /// Nothing was queued for the item; the operation was appended.
    Appended { id: OperationId, sequence: Sequence },
    /// The queued operation absorbed the new one.
    Absorbed { into: OperationId },
    /// The new operation cancelled the queued one and itself.
    Cancelled { cancelled: OperationId },
    /// The queued operation was cancelled and the new one appended.
    Superseded {
        cancelled: OperationId,
        id: OperationId,
        sequence: Sequence,
    },
}

impl Enqueued {
    /// Id of the live operation for the item after the enqueue, if any.
    pub fn live_id(&self) -> Option<&OperationId> {
        match self {
            Enqueued::Appended { id, .. } | Enqueued::Superseded { id, .. } => Some(id),
            Enqueued::Absorbed { into } => Some(into),
            Enqueued::Cancelled { .. } => None,
        }
    }

    /// Id of a previously queued operation that is no longer live.
    pub fn cancelled_id(&self) -> Option<&OperationId> {
        match self {
            Enqueued::Cancelled { cancelled } | Enqueued::Superseded { cancelled, .. } => {
                Some(cancelled)
            }
            _ => None,
        }
    }

    /// Id of the queued operation the new one collapsed with, if any.
    pub fn collapsed_id(&self) -> Option<&OperationId> {
        match self {
            Enqueued::Appended { .. } => None,
            Enqueued::Absorbed { into } => Some(into),
            _ => self.cancelled_id(),
        }
    }
}

/// Ordered log of pending operations with at most one live operation per item.
#[derive(Debug, Clone, Default)]
pub struct OperationQueue {
    entries: BTreeMap<Sequence, Operation>,
    ids: HashMap<OperationId, Sequence>,
    live: HashMap<ItemKey, Sequence>,
    last_sequence: Sequence,
}

impl OperationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted operations.
    ///
    /// Operations are ordered by sequence, then creation time. Entries whose
    /// sequence is missing or already taken get the next free sequence, so
    /// legacy logs load in a stable order. A log interrupted between saving a
    /// superseding operation and deleting the one it replaced holds two entries
    /// for one item; they are collapsed again as they load.
    pub fn load(operations: impl IntoIterator<Item = Operation>) -> Result<Self> {
        let mut operations: Vec<Operation> = operations.into_iter().collect();
        operations.sort_by_key(|op| (op.sequence(), op.created_at()));

        let mut queue = Self::new();
        for mut op in operations {
            if queue.ids.contains_key(op.id()) {
                return Err(Error::DuplicateOperation(op.id().clone()));
            }

            let sequence = if op.sequence() > queue.last_sequence {
                op.sequence()
            } else {
                queue.last_sequence + 1
            };
            op.set_sequence(sequence);
            queue.last_sequence = sequence;

            let persisted_version = op.version();
            let key = (op.table_name().clone(), op.item_id().clone());
            let existing = queue
                .live
                .get(&key)
                .and_then(|sequence| queue.entries.get_mut(sequence));

            let outcome = match existing {
                Some(existing) => existing.collapse(&mut op)?,
                None => Collapse::Superseded,
            };

            match outcome {
                Collapse::Superseded => {
                    // the persisted version already counts the superseded revision
                    op.restore_version(persisted_version);
                    queue.insert_live(key, op);
                }
                Collapse::Cancelled => {
                    queue.live.remove(&key);
                }
                Collapse::Absorbed => {}
            }
        }

        queue.compact();
        Ok(queue)
    }

    /// Rebuild a queue from persisted records.
    pub fn from_records(records: impl IntoIterator<Item = OperationRecord>) -> Result<Self> {
        let operations = records
            .into_iter()
            .map(Operation::from_record)
            .collect::<Result<Vec<_>>>()?;
        Self::load(operations)
    }

    /// Check that an operation of `kind` may be enqueued for the item.
    ///
    /// Does not change the queue.
    pub fn validate(&self, kind: OperationKind, table_name: &str, item_id: &str) -> Result<()> {
        match self.find_live(table_name, item_id) {
            Some(existing) => existing.validate(kind),
            None => Ok(()),
        }
    }

    /// Enqueue an operation, collapsing it into the live operation for the
    /// same item if there is one.
    ///
    /// On error the queue is unchanged.
    pub fn enqueue(&mut self, mut op: Operation) -> Result<Enqueued> {
        if self.ids.contains_key(op.id()) {
            return Err(Error::DuplicateOperation(op.id().clone()));
        }

        let key = (op.table_name().clone(), op.item_id().clone());
        let existing = self
            .live
            .get(&key)
            .and_then(|sequence| self.entries.get_mut(sequence));

        let existing = match existing {
            Some(existing) => existing,
            None => {
                let (id, sequence) = self.append(key, op);
                return Ok(Enqueued::Appended { id, sequence });
            }
        };

        let outcome = existing.collapse(&mut op)?;
        let existing_id = existing.id().clone();

        match outcome {
            Collapse::Absorbed => Ok(Enqueued::Absorbed { into: existing_id }),
            Collapse::Cancelled => {
                self.live.remove(&key);
                Ok(Enqueued::Cancelled {
                    cancelled: existing_id,
                })
            }
            Collapse::Superseded => {
                let (id, sequence) = self.append(key, op);
                Ok(Enqueued::Superseded {
                    cancelled: existing_id,
                    id,
                    sequence,
                })
            }
        }
    }

    fn append(&mut self, key: ItemKey, mut op: Operation) -> (OperationId, Sequence) {
        self.last_sequence += 1;
        let sequence = self.last_sequence;
        op.set_sequence(sequence);
        let id = op.id().clone();
        self.insert_live(key, op);
        (id, sequence)
    }

    fn insert_live(&mut self, key: ItemKey, op: Operation) {
        let sequence = op.sequence();
        self.ids.insert(op.id().clone(), sequence);
        self.live.insert(key, sequence);
        self.entries.insert(sequence, op);
    }

    /// First live operation in sequence order.
    pub fn peek(&self) -> Option<&Operation> {
        self.pending().next()
    }

    /// Live operations in sequence order.
    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.entries.values().filter(|op| !op.is_cancelled())
    }

    /// First live operation after `after` that matches the filter.
    pub fn next_pending<F>(&self, after: Sequence, filter: F) -> Option<&Operation>
    where
        F: Fn(&Operation) -> bool,
    {
        self.entries
            .range(after.saturating_add(1)..)
            .map(|(_, op)| op)
            .find(|op| !op.is_cancelled() && filter(op))
    }

    /// Get an operation by id, cancelled or not.
    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.ids.get(id).and_then(|sequence| self.entries.get(sequence))
    }

    /// Get the live operation for an item.
    pub fn find_live(&self, table_name: &str, item_id: &str) -> Option<&Operation> {
        self.live
            .get(&(table_name.to_string(), item_id.to_string()))
            .and_then(|sequence| self.entries.get(sequence))
    }

    /// Remove an operation from the log.
    pub fn remove(&mut self, id: &str) -> Option<Operation> {
        let sequence = self.ids.remove(id)?;
        let op = self.entries.remove(&sequence)?;

        let key = (op.table_name().clone(), op.item_id().clone());
        if self.live.get(&key) == Some(&sequence) {
            self.live.remove(&key);
        }

        Some(op)
    }

    /// Remove an operation only if it is still at `version`.
    ///
    /// Used when resolving an error: a newer revision of the operation must
    /// not be discarded on the strength of an error about an older one.
    pub fn remove_if_version(&mut self, id: &str, version: Version) -> Result<Operation> {
        let current = self
            .get(id)
            .filter(|op| !op.is_cancelled())
            .map(Operation::version)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        if current != version {
            return Err(Error::OperationModified {
                id: id.to_string(),
                expected: version,
                actual: current,
            });
        }

        self.remove(id)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))
    }

    /// Drop cancelled entries from the log. Returns how many were dropped.
    pub fn compact(&mut self) -> usize {
        let cancelled: Vec<Sequence> = self
            .entries
            .iter()
            .filter(|(_, op)| op.is_cancelled())
            .map(|(sequence, _)| *sequence)
            .collect();

        for sequence in &cancelled {
            if let Some(op) = self.entries.remove(sequence) {
                self.ids.remove(op.id());
            }
        }

        cancelled.len()
    }

    /// Number of live operations.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Check if there are no live operations.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Number of entries in the log, including cancelled ones not yet compacted.
    pub fn log_len(&self) -> usize {
        self.entries.len()
    }

    /// Number of live operations for a table.
    pub fn count_pending(&self, table_name: &str) -> usize {
        self.live
            .keys()
            .filter(|(table, _)| table == table_name)
            .count()
    }

    /// Highest sequence handed out so far.
    pub fn last_sequence(&self) -> Sequence {
        self.last_sequence
    }

    /// Persisted records of the live operations, in sequence order.
    pub fn records(&self) -> Vec<OperationRecord> {
        self.pending().map(Operation::to_record).collect()
    }

    /// Export the live operations and sequence counter.
    pub fn export_state(&self) -> QueueSnapshot {
        QueueSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_sequence: self.last_sequence + 1,
            operations: self.records(),
        }
    }

    /// Rebuild a queue from a snapshot.
    pub fn import_state(snapshot: QueueSnapshot) -> Result<Self> {
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {}",
                snapshot.format_version
            )));
        }

        let mut queue = Self::from_records(snapshot.operations)?;
        queue.last_sequence = queue
            .last_sequence
            .max(snapshot.next_sequence.saturating_sub(1));
        Ok(queue)
    }
}
