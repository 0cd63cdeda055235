//! Error types for the operation queue engine.

use crate::{ItemId, OperationId, OperationKind, TableName, Version};
use thiserror::Error;

/// All possible errors from the queue engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Collapsing errors
    #[error(
        "cannot queue {attempted} for {table}/{item_id}: {queued} operation on the item is already in the queue"
    )]
    QueueConflict {
        table: TableName,
        item_id: ItemId,
        queued: OperationKind,
        attempted: OperationKind,
    },

    #[error("duplicate operation id: {0}")]
    DuplicateOperation(OperationId),

    // Execution errors
    #[error("operation {0} must have an item associated with it")]
    MissingItem(OperationId),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    // Resolution errors
    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("operation {id} has been updated and cannot be cancelled (expected version {expected}, found {actual})")]
    OperationModified {
        id: OperationId,
        expected: Version,
        actual: Version,
    },

    // Persistence errors
    #[error("invalid operation record: {0}")]
    InvalidRecord(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
