//! Persisted form of queued operations.
//!
//! The record is what survives a process restart. Its item is stored as JSON
//! text rather than a nested object so the payload round-trips unchanged.
//! Bookkeeping fields default to zero when absent, which keeps logs written
//! by older clients readable.

use crate::{
    error::Result, item::Item, Error, ItemId, Operation, OperationId, OperationKind, Sequence,
    TableKind, TableName, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A queued operation as written to the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub table_name: TableName,
    #[serde(default)]
    pub table_kind: TableKind,
    pub item_id: ItemId,
    /// Item as compact JSON text
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub sequence: Sequence,
    #[serde(default, alias = "__createdAt")]
    pub created_at: Timestamp,
}

impl OperationRecord {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Deserialize from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}

/// Encode an item as compact JSON text.
pub fn encode_item(item: &Item) -> String {
    Value::Object(item.clone()).to_string()
}

/// Decode item JSON text. Empty text means no item.
pub fn decode_item(text: Option<&str>) -> Result<Option<Item>> {
    match text {
        None | Some("") => Ok(None),
        Some(json) => match serde_json::from_str(json) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(Error::InvalidRecord(format!(
                "item must be a JSON object, got {}",
                other
            ))),
            Err(e) => Err(Error::InvalidRecord(format!("item is not valid JSON: {}", e))),
        },
    }
}

impl Operation {
    /// Produce the persisted record for this operation.
    pub fn to_record(&self) -> OperationRecord {
        OperationRecord {
            id: self.id().clone(),
            kind: self.kind(),
            table_name: self.table_name().clone(),
            table_kind: self.table_kind(),
            item_id: self.item_id().clone(),
            item: self.item().map(encode_item),
            version: self.version(),
            sequence: self.sequence(),
            created_at: self.created_at(),
        }
    }

    /// Rebuild an operation from its persisted record.
    pub fn from_record(record: OperationRecord) -> Result<Self> {
        let item = decode_item(record.item.as_deref())?;

        let mut operation = Operation::new(
            record.id,
            record.kind,
            record.table_name,
            record.item_id,
            item,
            record.created_at,
        )
        .with_table_kind(record.table_kind);
        operation.restore_version(record.version);
        operation.set_sequence(record.sequence);

        Ok(operation)
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String> {
        self.to_record().to_json()
    }

    /// Deserialize from the persisted JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_record(OperationRecord::from_json(json)?)
    }
}
