//! Item helpers.
//!
//! Items are the JSON objects stored in a table. The engine never interprets
//! their fields beyond the `id` and the `__`-prefixed system properties.

use serde_json::{Map, Value};

/// A table record as a JSON object.
pub type Item = Map<String, Value>;

/// Name of the identity property of every item.
pub const ID_PROPERTY: &str = "id";

/// Prefix shared by all server-managed system properties.
pub const SYSTEM_PROPERTY_PREFIX: &str = "__";

/// Server concurrency token carried by items.
pub const VERSION_PROPERTY: &str = "__version";

/// Read the string `id` of an item.
pub fn item_id(item: &Item) -> Option<&str> {
    item.get(ID_PROPERTY).and_then(Value::as_str)
}

/// Read the server concurrency token of an item.
pub fn item_version(item: &Item) -> Option<&str> {
    item.get(VERSION_PROPERTY).and_then(Value::as_str)
}

/// Check whether a property name is a system property.
pub fn is_system_property(name: &str) -> bool {
    name.starts_with(SYSTEM_PROPERTY_PREFIX)
}

/// Return a copy of the item without system properties.
///
/// When `keep_version` is set the `__version` property survives, so the
/// remote can still perform its optimistic concurrency check.
pub fn strip_system_properties(item: &Item, keep_version: bool) -> Item {
    item.iter()
        .filter(|(name, _)| {
            !is_system_property(name) || (keep_version && name.as_str() == VERSION_PROPERTY)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Convert a JSON value into an item if it is an object.
pub fn into_item(value: Value) -> Option<Item> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
