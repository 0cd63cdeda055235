//! Error types for the sync layer.

use crate::{config::ConfigError, push::PushStatus};
use opqueue_engine::TableName;

/// Failure reported by the remote table service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote answered with a non-success status.
    #[error("remote rejected the request with status {status}")]
    Status { status: u16, body: Option<String> },

    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// A sync handler asked for the whole push to stop.
    #[error("push aborted by operation: {0}")]
    Aborted(String),
}

impl RemoteError {
    /// HTTP-like status code, if the remote answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, if the remote answered with one.
    pub fn body(&self) -> Option<&str> {
        match self {
            RemoteError::Status { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    pub fn is_authentication(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 409, or 412 when the `__version` precondition failed.
    pub fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(409) | Some(412))
    }
}

/// Failure of a local store or the durable operation log.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflicting records for {table}/{id} in one upsert")]
    Conflict { table: TableName, id: String },

    #[error("item for table {table} has no string id")]
    MissingId { table: TableName },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the sync context.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] opqueue_engine::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local store error: {0}")]
    LocalStore(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("the sync context has not been initialized")]
    NotInitialized,

    #[error("push did not complete: {0}")]
    PushAborted(PushStatus),
}

/// Result type alias for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
