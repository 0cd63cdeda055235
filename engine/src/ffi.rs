//! FFI layer for driving the queue from other languages.
//!
//! This module provides C-compatible functions that can be called via Dart FFI,
//! Swift or Kotlin. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `opq_*` functions are allocated by Rust
//! - Caller must free them with `opq_string_free`
//! - Queue pointers must be freed with `opq_queue_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{Operation, OperationQueue, OperationRecord, QueueSnapshot};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Convert a Rust string to a C string pointer.
/// Returns null if the string contains a NUL byte, which serialized JSON never does.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn error_string(message: impl Into<String>) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

// ============================================================================
// Queue Lifecycle
// ============================================================================

/// Create a new empty queue.
///
/// The caller owns the returned pointer and must free it with `opq_queue_free`.
#[no_mangle]
pub extern "C" fn opq_queue_new() -> *mut OperationQueue {
    Box::into_raw(Box::new(OperationQueue::new()))
}

/// Free a queue.
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn opq_queue_free(queue: *mut OperationQueue) {
    if !queue.is_null() {
        drop(Box::from_raw(queue));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from an `opq_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn opq_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Queue Operations
// ============================================================================

/// Enqueue an operation.
///
/// # Arguments
/// - `queue`: Queue pointer
/// - `op_json`: JSON string of an operation record; a missing `version`
///   means a fresh operation at version 1
///
/// # Returns
/// JSON string: `{"ok": Enqueued}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
/// - `op_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `opq_string_free`
#[no_mangle]
pub unsafe extern "C" fn opq_queue_enqueue(
    queue: *mut OperationQueue,
    op_json: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_string("null queue pointer"),
    };

    let op_str = match from_c_string(op_json) {
        Some(s) => s,
        None => return error_string("invalid operation JSON"),
    };

    let mut record = match OperationRecord::from_json(&op_str) {
        Ok(r) => r,
        Err(e) => return error_string(e.to_string()),
    };
    if record.version == 0 {
        record.version = 1;
    }

    let result = Operation::from_record(record).and_then(|op| queue.enqueue(op));
    match result {
        Ok(outcome) => to_c_string(FfiResult::ok(outcome).to_json()),
        Err(e) => error_string(e.to_string()),
    }
}

/// Get the live operations in sequence order.
///
/// # Returns
/// JSON string: `{"ok": [OperationRecord, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
/// - Caller must free the returned string with `opq_string_free`
#[no_mangle]
pub unsafe extern "C" fn opq_queue_pending(queue: *const OperationQueue) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_string("null queue pointer"),
    };

    to_c_string(FfiResult::ok(queue.records()).to_json())
}

/// Get the number of live operations.
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
#[no_mangle]
pub unsafe extern "C" fn opq_queue_pending_count(queue: *const OperationQueue) -> i64 {
    match queue.as_ref() {
        Some(q) => q.len() as i64,
        None => -1,
    }
}

/// Remove an operation after it has been pushed or discarded.
///
/// # Arguments
/// - `id`: Operation id
/// - `version`: Expected operation version, or a negative value to remove
///   regardless of version
///
/// # Returns
/// JSON string: `{"ok": OperationRecord}`, `{"ok": null}` when nothing was
/// removed, or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
/// - `id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `opq_string_free`
#[no_mangle]
pub unsafe extern "C" fn opq_queue_remove(
    queue: *mut OperationQueue,
    id: *const c_char,
    version: i64,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_string("null queue pointer"),
    };

    let id_str = match from_c_string(id) {
        Some(s) => s,
        None => return error_string("invalid id"),
    };

    if version < 0 {
        let removed = queue.remove(&id_str).map(|op| op.to_record());
        return to_c_string(FfiResult::ok(removed).to_json());
    }

    match queue.remove_if_version(&id_str, version as u64) {
        Ok(op) => to_c_string(FfiResult::ok(op.to_record()).to_json()),
        Err(e) => error_string(e.to_string()),
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Export the queue as a snapshot.
///
/// # Returns
/// JSON string: `{"ok": QueueSnapshot}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
/// - Caller must free the returned string with `opq_string_free`
#[no_mangle]
pub unsafe extern "C" fn opq_queue_export(queue: *const OperationQueue) -> *mut c_char {
    let queue = match queue.as_ref() {
        Some(q) => q,
        None => return error_string("null queue pointer"),
    };

    to_c_string(FfiResult::ok(queue.export_state()).to_json())
}

/// Replace the queue contents with a snapshot.
///
/// On error the queue is left unchanged.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `queue` must be a valid pointer from `opq_queue_new` or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `opq_string_free`
#[no_mangle]
pub unsafe extern "C" fn opq_queue_import(
    queue: *mut OperationQueue,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let queue = match queue.as_mut() {
        Some(q) => q,
        None => return error_string("null queue pointer"),
    };

    let snapshot_str = match from_c_string(snapshot_json) {
        Some(s) => s,
        None => return error_string("invalid snapshot JSON"),
    };

    let restored = QueueSnapshot::from_json(&snapshot_str).and_then(OperationQueue::import_state);
    match restored {
        Ok(restored) => {
            *queue = restored;
            to_c_string(FfiResult::ok(()).to_json())
        }
        Err(e) => error_string(e.to_string()),
    }
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn opq_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Get the snapshot format version.
#[no_mangle]
pub extern "C" fn opq_snapshot_format_version() -> u32 {
    crate::SNAPSHOT_FORMAT_VERSION
}
