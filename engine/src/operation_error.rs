//! Failed remote executions.
//!
//! An [`OperationError`] is produced when the remote rejects a queued
//! operation. It carries the payload that was sent, the raw server response
//! and the operation version at execution time, which is what a caller needs
//! to resolve the conflict and later cancel exactly that revision.

use crate::{
    error::Result,
    item::Item,
    record::{decode_item, encode_item},
    Error, Operation, OperationId, OperationKind, TableKind, TableName, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a remote outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    Success,
    /// 409, or 412 for a failed precondition on `__version`
    Conflict,
    NotFound,
    Unauthorized,
    ClientError,
    ServerError,
    /// No response was received
    Unknown,
}

impl ResponseStatus {
    /// Classify an HTTP-like status code.
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            None => ResponseStatus::Unknown,
            Some(200..=299) => ResponseStatus::Success,
            Some(401) => ResponseStatus::Unauthorized,
            Some(404) => ResponseStatus::NotFound,
            Some(409) | Some(412) => ResponseStatus::Conflict,
            Some(400..=499) => ResponseStatus::ClientError,
            Some(500..=599) => ResponseStatus::ServerError,
            Some(_) => ResponseStatus::Unknown,
        }
    }
}

/// Details of a failed table operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    /// Id of the failed operation
    pub id: OperationId,
    /// Operation version at execution time
    pub operation_version: Version,
    pub operation_kind: OperationKind,
    pub table_name: TableName,
    pub table_kind: TableKind,
    /// Status code returned by the remote, if any
    pub status_code: Option<u16>,
    /// Item sent to the remote
    pub item: Option<Item>,
    /// Raw response body
    pub raw_result: Option<String>,
    /// Response body when it parsed as an object
    pub result: Option<Item>,
    /// Set by a sync handler once the error has been dealt with
    pub handled: bool,
}

impl OperationError {
    /// Build an error for an operation that the remote rejected.
    pub fn new(operation: &Operation, status_code: Option<u16>, raw_result: Option<String>) -> Self {
        let result = raw_result.as_deref().and_then(parse_result);
        Self {
            id: operation.id().clone(),
            operation_version: operation.version(),
            operation_kind: operation.kind(),
            table_name: operation.table_name().clone(),
            table_kind: operation.table_kind(),
            status_code,
            item: operation.item().cloned(),
            raw_result,
            result,
            handled: false,
        }
    }

    /// Outcome classification of the status code.
    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::from_code(self.status_code)
    }

    /// Whether the remote rejected the change because it saw a newer version.
    pub fn is_conflict(&self) -> bool {
        self.status() == ResponseStatus::Conflict
    }

    /// Id of the item the failed operation targeted.
    pub fn item_id(&self) -> Option<&str> {
        self.item.as_ref().and_then(crate::item::item_id)
    }

    /// Produce the persisted record.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            id: self.id.clone(),
            http_status: self.status_code,
            operation_version: self.operation_version,
            operation_kind: self.operation_kind,
            table_name: self.table_name.clone(),
            table_kind: self.table_kind,
            item: self.item.as_ref().map(encode_item),
            raw_result: self.raw_result.clone(),
        }
    }

    /// Rebuild an error from its persisted record.
    pub fn from_record(record: ErrorRecord) -> Result<Self> {
        let item = decode_item(record.item.as_deref())?;
        let result = record.raw_result.as_deref().and_then(parse_result);

        Ok(Self {
            id: record.id,
            operation_version: record.operation_version,
            operation_kind: record.operation_kind,
            table_name: record.table_name,
            table_kind: record.table_kind,
            status_code: record.http_status,
            item,
            raw_result: record.raw_result,
            result,
            handled: false,
        })
    }
}

fn parse_result(raw: &str) -> Option<Item> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// An operation error as written to the sync error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: OperationId,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub operation_version: Version,
    pub operation_kind: OperationKind,
    pub table_name: TableName,
    #[serde(default)]
    pub table_kind: TableKind,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub raw_result: Option<String>,
}

impl ErrorRecord {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}
