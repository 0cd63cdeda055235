//! # Opqueue Engine
//!
//! The deterministic core of an offline-first table sync client.
//!
//! Local changes to table items are recorded as operations and kept in a
//! durable queue until they are pushed to the remote. While waiting, later
//! changes to the same item collapse into the queued one, so the remote sees
//! at most one operation per item per push.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, network or databases
//! - **Deterministic**: the same enqueue sequence always yields the same queue
//! - **Portable**: the queue can be driven through a C ABI
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! An [`Operation`] is one pending [`OperationKind::Insert`],
//! [`OperationKind::Update`] or [`OperationKind::Delete`] for a single item.
//! Each carries a revision counter (`version`) that grows whenever a later
//! change collapses into it.
//!
//! ### Collapsing
//!
//! | queued \ new | insert   | update   | delete     |
//! |--------------|----------|----------|------------|
//! | insert       | rejected | absorbed | cancelled  |
//! | update       | absorbed | absorbed | superseded |
//! | delete       | rejected | rejected | rejected   |
//!
//! ### Records
//!
//! [`OperationRecord`] and [`ErrorRecord`] are the persisted forms of queued
//! operations and failed pushes. Items are stored as JSON text.
//!
//! ## Quick Start
//!
//! ```rust
//! use opqueue_engine::{item::into_item, Enqueued, Operation, OperationKind, OperationQueue};
//! use serde_json::json;
//!
//! let mut queue = OperationQueue::new();
//!
//! let item = into_item(json!({"id": "abc", "text": "draft"})).unwrap();
//! queue
//!     .enqueue(Operation::insert("op-1", "todos", "abc", item, 1706745600000))
//!     .unwrap();
//!
//! let edited = into_item(json!({"id": "abc", "text": "final"})).unwrap();
//! let outcome = queue
//!     .enqueue(Operation::update("op-2", "todos", "abc", edited, 1706745600001))
//!     .unwrap();
//!
//! assert_eq!(outcome, Enqueued::Absorbed { into: "op-1".to_string() });
//! let live = queue.peek().unwrap();
//! assert_eq!(live.kind(), OperationKind::Insert);
//! assert_eq!(live.version(), 2);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module exposes the queue through C-compatible functions. All
//! data is exchanged as JSON strings.
//!
//! ## Persistence
//!
//! Use [`OperationQueue::export_state`] and [`OperationQueue::import_state`]
//! with [`QueueSnapshot`], or persist individual [`OperationRecord`]s.

pub mod error;
pub mod ffi;
pub mod item;
pub mod operation;
pub mod operation_error;
pub mod queue;
pub mod record;
pub mod snapshot;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use item::Item;
pub use operation::{Collapse, Operation, OperationKind, TableKind};
pub use operation_error::{ErrorRecord, OperationError, ResponseStatus};
pub use queue::{Enqueued, OperationQueue};
pub use record::OperationRecord;
pub use snapshot::{QueueSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type TableName = String;
pub type ItemId = String;
pub type OperationId = String;
pub type Sequence = u64;
pub type Version = u64;
pub type Timestamp = u64;
