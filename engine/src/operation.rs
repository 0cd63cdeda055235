//! Operation types for pending table mutations.
//!
//! An operation is one queued local change (insert, update or delete) against
//! a single item. Operations for the same item collapse into each other while
//! they wait in the queue, so at most one of them is ever sent.

use crate::{
    error::Result, item::Item, Error, ItemId, OperationId, Sequence, TableName, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a queued operation.
///
/// Persisted as an integer: `0` insert, `1` update, `2` delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Integer code used in persisted records.
    pub fn code(self) -> u8 {
        match self {
            OperationKind::Insert => 0,
            OperationKind::Update => 1,
            OperationKind::Delete => 2,
        }
    }

    /// Decode a persisted integer code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperationKind::Insert),
            1 => Some(OperationKind::Update),
            2 => Some(OperationKind::Delete),
            _ => None,
        }
    }

    /// Lowercase name for messages and logs.
    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Whether the record returned by the remote is written back locally.
    pub fn writes_result_to_store(self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<OperationKind> for u8 {
    fn from(kind: OperationKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for OperationKind {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        OperationKind::from_code(code).ok_or_else(|| format!("unknown operation kind: {}", code))
    }
}

/// Kind of the table an operation targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TableKind {
    /// A regular data table
    #[default]
    Table,
    /// A table of file metadata
    File,
}

impl TableKind {
    /// Integer code used in persisted records.
    pub fn code(self) -> u8 {
        match self {
            TableKind::Table => 0,
            TableKind::File => 1,
        }
    }
}

impl From<TableKind> for u8 {
    fn from(kind: TableKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for TableKind {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(TableKind::Table),
            1 => Ok(TableKind::File),
            other => Err(format!("unknown table kind: {}", other)),
        }
    }
}

/// What happened when a new operation was collapsed into a queued one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    /// The queued operation took over the new payload; the new one is cancelled.
    Absorbed,
    /// Both operations cancel out; nothing is left to send.
    Cancelled,
    /// The queued operation is cancelled and the new one takes its place.
    Superseded,
}

/// A pending mutation against one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    id: OperationId,
    kind: OperationKind,
    table_name: TableName,
    table_kind: TableKind,
    item_id: ItemId,
    item: Option<Item>,
    version: Version,
    sequence: Sequence,
    created_at: Timestamp,
    cancelled: bool,
    updated: bool,
}

impl Operation {
    /// Create a new operation at version 1.
    ///
    /// The sequence is assigned when the operation enters a queue.
    pub fn new(
        id: impl Into<OperationId>,
        kind: OperationKind,
        table_name: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        item: Option<Item>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            table_name: table_name.into(),
            table_kind: TableKind::Table,
            item_id: item_id.into(),
            item,
            version: 1,
            sequence: 0,
            created_at,
            cancelled: false,
            updated: false,
        }
    }

    /// Create an insert operation.
    pub fn insert(
        id: impl Into<OperationId>,
        table_name: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        item: Item,
        created_at: Timestamp,
    ) -> Self {
        Self::new(id, OperationKind::Insert, table_name, item_id, Some(item), created_at)
    }

    /// Create an update operation.
    pub fn update(
        id: impl Into<OperationId>,
        table_name: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        item: Item,
        created_at: Timestamp,
    ) -> Self {
        Self::new(id, OperationKind::Update, table_name, item_id, Some(item), created_at)
    }

    /// Create a delete operation.
    ///
    /// The item is optional: it is only needed to carry a concurrency token.
    pub fn delete(
        id: impl Into<OperationId>,
        table_name: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        item: Option<Item>,
        created_at: Timestamp,
    ) -> Self {
        Self::new(id, OperationKind::Delete, table_name, item_id, item, created_at)
    }

    /// Set the table kind.
    pub fn with_table_kind(mut self, table_kind: TableKind) -> Self {
        self.table_kind = table_kind;
        self
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    pub fn table_kind(&self) -> TableKind {
        self.table_kind
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn item(&self) -> Option<&Item> {
        self.item.as_ref()
    }

    /// Revision counter, bumped each time a later operation collapses into this one.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Position in the queue. Zero until enqueued.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether collapsing has changed this operation since it was created.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Replace the payload without counting it as a revision.
    ///
    /// Used while executing: loading an absent item from the local store, or a
    /// sync handler adjusting the concurrency token before a retry.
    pub fn set_item(&mut self, item: Option<Item>) {
        self.item = item;
    }

    pub(crate) fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    pub(crate) fn restore_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Check whether an operation of `attempted` kind may join this one.
    ///
    /// Pure: never changes either operation.
    pub fn validate(&self, attempted: OperationKind) -> Result<()> {
        let allowed = match (self.kind, attempted) {
            (OperationKind::Insert, OperationKind::Insert) => false,
            (OperationKind::Insert, _) => true,
            (OperationKind::Update, _) => true,
            (OperationKind::Delete, _) => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::QueueConflict {
                table: self.table_name.clone(),
                item_id: self.item_id.clone(),
                queued: self.kind,
                attempted,
            })
        }
    }

    /// Collapse a newly enqueued operation for the same item into this one.
    ///
    /// | queued \ new | insert   | update   | delete     |
    /// |--------------|----------|----------|------------|
    /// | insert       | rejected | absorbed | cancelled  |
    /// | update       | absorbed | absorbed | superseded |
    /// | delete       | rejected | rejected | rejected   |
    ///
    /// Rejected transitions return the same error as [`Operation::validate`]
    /// and leave both operations untouched.
    pub fn collapse(&mut self, new: &mut Operation) -> Result<Collapse> {
        self.validate(new.kind)?;

        let outcome = match (self.kind, new.kind) {
            (OperationKind::Insert, OperationKind::Delete) => {
                self.cancel();
                new.cancel();
                Collapse::Cancelled
            }
            (OperationKind::Update, OperationKind::Delete) => {
                self.cancel();
                new.version += 1;
                new.updated = true;
                Collapse::Superseded
            }
            // insert/update followed by update, or update followed by insert
            _ => {
                self.absorb(new);
                Collapse::Absorbed
            }
        };

        Ok(outcome)
    }

    fn absorb(&mut self, new: &mut Operation) {
        if let Some(item) = new.item.take() {
            self.item = Some(item);
        }
        self.version += 1;
        self.updated = true;
        new.cancel();
    }
}
