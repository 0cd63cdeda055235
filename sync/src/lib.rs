//! # Opqueue Sync
//!
//! The asynchronous half of opqueue: a [`SyncContext`] that applies local
//! mutations, queues them in an [`opqueue_engine::OperationQueue`], persists
//! the queue, and pushes it to a [`RemoteTable`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use opqueue_sync::{
//!     telemetry, DefaultSyncHandler, RemoteTable, SqliteStore, SyncConfig, SyncContext,
//! };
//! use opqueue_engine::item::into_item;
//! use serde_json::json;
//!
//! # async fn run(remote: Arc<dyn RemoteTable>) -> opqueue_sync::Result<()> {
//! let config = SyncConfig::load()?;
//! telemetry::init(&config).ok();
//!
//! let store = Arc::new(SqliteStore::from_config(&config).await?);
//! let context = SyncContext::new(store.clone(), store, remote, Arc::new(DefaultSyncHandler), config);
//! context.initialize().await?;
//!
//! let todo = into_item(json!({"id": "t1", "text": "buy milk"})).unwrap();
//! context.insert("todos", todo).await?;
//!
//! let completion = context.push().await?;
//! for error in completion.unhandled_errors() {
//!     eprintln!("{} failed: {:?}", error.id, error.status());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod locks;
pub mod push;
pub mod remote;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, SyncConfig};
pub use context::SyncContext;
pub use error::{RemoteError, Result, StoreError, SyncError};
pub use handler::{DefaultSyncHandler, SyncHandler};
pub use locks::{ItemGuard, ItemLocks};
pub use push::{CancelToken, PushCompletion, PushOptions, PushStatus};
pub use remote::{execute_remote, RemoteTable};
pub use store::{LocalStore, MemoryStore, QueueStore, SqliteStore, StoreResult};
