//! The remote table capability and the remote half of executing an operation.

use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use opqueue_engine::{
    item::{strip_system_properties, Item},
    Error, Operation, OperationKind,
};
use serde_json::Value;

/// Network access to the remote tables.
///
/// Each call returns the response body: `None` for "no content", otherwise
/// whatever JSON the service sent back.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    async fn insert(&self, table: &str, item: &Item) -> std::result::Result<Option<Value>, RemoteError>;

    async fn update(&self, table: &str, item: &Item) -> std::result::Result<Option<Value>, RemoteError>;

    async fn delete(&self, table: &str, item: &Item) -> std::result::Result<Option<Value>, RemoteError>;
}

/// Send an operation to the remote.
///
/// Inserts go out without system properties; updates and deletes keep
/// `__version` so the remote can detect conflicts. A delete of a record the
/// remote no longer has counts as success.
pub async fn execute_remote(remote: &dyn RemoteTable, operation: &Operation) -> Result<Option<Item>> {
    let item = operation
        .item()
        .ok_or_else(|| Error::MissingItem(operation.id().clone()))?;
    let table = operation.table_name();

    let response = match operation.kind() {
        OperationKind::Insert => remote.insert(table, &strip_system_properties(item, false)).await?,
        OperationKind::Update => remote.update(table, &strip_system_properties(item, true)).await?,
        OperationKind::Delete => {
            match remote.delete(table, &strip_system_properties(item, true)).await {
                Err(e) if e.is_not_found() => None,
                other => other?,
            }
        }
    };

    interpret_response(response)
}

/// Accept a single record or no content; anything else is unexpected.
pub fn interpret_response(response: Option<Value>) -> Result<Option<Item>> {
    match response {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(record)) => Ok(Some(record)),
        Some(Value::Array(items)) => Err(Error::UnexpectedResponse(format!(
            "expected a single record, got a list of {}",
            items.len()
        ))
        .into()),
        Some(other) => Err(Error::UnexpectedResponse(format!(
            "expected a single record, got {}",
            other
        ))
        .into()),
    }
}
