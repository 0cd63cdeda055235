//! The push pass: replaying queued operations against the remote.
//!
//! A pass walks the queue in sequence order. Each operation is executed under
//! its item lock, so a local mutation of the same item waits until the
//! operation has been sent and its result applied. Mutations of other items
//! proceed while the pass suspends on network or store I/O.
//!
//! Per-item failures are recorded as [`OperationError`]s and the pass moves
//! on. Only network and authentication failures, handler aborts, local store
//! failures and cancellation stop the pass early.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opqueue_engine::{
    item::{strip_system_properties, Item},
    Operation, OperationError, OperationKind, Sequence, TableKind, TableName,
};
use tracing::{debug, error, info, warn};

use crate::{
    context::SyncContext,
    error::{RemoteError, StoreError, SyncError},
    store::StoreResult,
    Result,
};

/// How a push pass ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PushStatus {
    /// Every matching operation was attempted.
    #[default]
    Complete,
    /// A [`CancelToken`] was cancelled.
    CancelledByToken,
    /// The remote could not be reached.
    CancelledByNetworkError,
    /// The remote rejected the credentials.
    CancelledByAuthenticationError,
    /// The sync handler aborted the pass.
    CancelledByOperation,
    /// A local store or the operation log failed.
    CancelledBySyncStoreError,
}

impl PushStatus {
    pub fn is_complete(self) -> bool {
        self == PushStatus::Complete
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PushStatus::Complete => "complete",
            PushStatus::CancelledByToken => "cancelled by token",
            PushStatus::CancelledByNetworkError => "cancelled by network error",
            PushStatus::CancelledByAuthenticationError => "cancelled by authentication error",
            PushStatus::CancelledByOperation => "cancelled by operation",
            PushStatus::CancelledBySyncStoreError => "cancelled by sync store error",
        };
        f.write_str(text)
    }
}

/// Outcome of a push pass.
#[derive(Debug, Default)]
pub struct PushCompletion {
    pub status: PushStatus,
    /// Per-item failures, including ones left over from earlier passes
    pub errors: Vec<OperationError>,
    /// Failures that are not tied to a remote rejection, such as store errors
    pub other_errors: Vec<SyncError>,
    /// Operations sent and applied during this pass
    pub succeeded: usize,
}

impl PushCompletion {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Errors no handler has marked as dealt with.
    pub fn unhandled_errors(&self) -> impl Iterator<Item = &OperationError> {
        self.errors.iter().filter(|error| !error.handled)
    }

    /// Fail with [`SyncError::PushAborted`] unless the pass completed.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(SyncError::PushAborted(self.status))
        }
    }
}

/// Restricts which operations a pass sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Only operations against this kind of table
    pub table_kind: Option<TableKind>,
    /// Only operations against these tables; empty means all tables
    pub tables: Vec<TableName>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table_kind(mut self, table_kind: TableKind) -> Self {
        self.table_kind = Some(table_kind);
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TableName>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether an operation falls within these options.
    pub fn matches(&self, operation: &Operation) -> bool {
        let kind_matches = self
            .table_kind
            .map_or(true, |kind| kind == operation.table_kind());
        let table_matches =
            self.tables.is_empty() || self.tables.iter().any(|t| t == operation.table_name());
        kind_matches && table_matches
    }
}

/// Cooperative cancellation for a push pass.
///
/// Checked between operations; an operation already in flight completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of pushing one operation.
enum Step {
    Pushed,
    Failed,
    Skipped,
    Abort(PushStatus, Option<SyncError>),
}

impl SyncContext {
    /// Push every queued operation.
    pub async fn push(&self) -> Result<PushCompletion> {
        self.push_with(&PushOptions::default(), &CancelToken::new())
            .await
    }

    /// Push the queued operations matching `options`.
    ///
    /// Returns the completion even when the pass stopped early; use
    /// [`PushCompletion::ensure_complete`] to turn an early stop into an
    /// error. Only failures while loading or clearing stored errors, or from
    /// the handler's completion hook, are returned as `Err`.
    pub async fn push_with(&self, options: &PushOptions, cancel: &CancelToken) -> Result<PushCompletion> {
        self.ensure_initialized()?;
        let _pass = self.push_lock.lock().await;

        let pending = self.queue.lock().await.len();
        info!(pending, tables = ?options.tables, "Push started");

        let mut cursor: Sequence = 0;
        let mut succeeded = 0;
        let mut other_errors = Vec::new();

        let status = loop {
            if cancel.is_cancelled() {
                break PushStatus::CancelledByToken;
            }

            let next = {
                let queue = self.queue.lock().await;
                queue.next_pending(cursor, |op| options.matches(op)).map(|op| {
                    (
                        op.id().clone(),
                        op.sequence(),
                        op.table_name().clone(),
                        op.item_id().clone(),
                    )
                })
            };
            let Some((id, sequence, table, item_id)) = next else {
                break PushStatus::Complete;
            };
            cursor = sequence;

            match self.push_operation(&id, &table, &item_id).await {
                Step::Pushed => succeeded += 1,
                Step::Failed | Step::Skipped => {}
                Step::Abort(status, cause) => {
                    other_errors.extend(cause);
                    break status;
                }
            }
        };

        let errors = self
            .queue_store
            .load_errors()
            .await?
            .into_iter()
            .map(OperationError::from_record)
            .collect::<opqueue_engine::Result<Vec<_>>>()?;

        let mut completion = PushCompletion {
            status,
            errors,
            other_errors,
            succeeded,
        };

        self.handler.on_push_complete(&mut completion).await?;
        self.queue_store.delete_errors().await?;
        self.locks.prune();

        info!(
            status = %completion.status,
            succeeded = completion.succeeded,
            errors = completion.errors.len(),
            "Push finished"
        );

        Ok(completion)
    }

    async fn push_operation(&self, id: &str, table: &str, item_id: &str) -> Step {
        let _guard = self.locks.acquire(table, item_id).await;

        // the operation may have been collapsed while we waited for the lock
        let current = self.queue.lock().await.get(id).cloned();
        let mut op = match current {
            Some(op) if !op.is_cancelled() => op,
            _ => return Step::Skipped,
        };

        if op.item().is_none() && op.kind() != OperationKind::Delete {
            match self.local.lookup(table, item_id).await {
                Ok(item) => op.set_item(item),
                Err(e) => return store_abort(id, e),
            }
        }

        debug!(
            op_id = %id,
            table = %table,
            sequence = op.sequence(),
            kind = %op.kind(),
            "Pushing operation"
        );

        let result = match self
            .handler
            .execute_table_operation(self.remote.as_ref(), &mut op)
            .await
        {
            Ok(result) => result,
            Err(SyncError::LocalStore(e)) => return store_abort(id, e),
            Err(err) => return self.record_failure(&op, err).await,
        };

        if let Err(e) = self.execute_local(&op, result).await {
            return store_abort(id, e);
        }

        if let Err(e) = self.queue_store.delete_operation(id).await {
            return store_abort(id, e);
        }
        self.queue.lock().await.remove(id);

        debug!(op_id = %id, table = %table, "Operation pushed");
        Step::Pushed
    }

    /// Apply a successful result to the local store.
    async fn execute_local(&self, op: &Operation, result: Option<Item>) -> StoreResult<()> {
        if !op.kind().writes_result_to_store() {
            return self.local.delete(op.table_name(), op.item_id()).await;
        }

        match result {
            Some(record) => {
                let record = strip_system_properties(&record, true);
                self.local.upsert(op.table_name(), &[record], false).await
            }
            None => Ok(()),
        }
    }

    async fn record_failure(&self, op: &Operation, err: SyncError) -> Step {
        if let SyncError::Remote(remote) = &err {
            if let Some(status) = self.abort_status(remote) {
                warn!(op_id = %op.id(), status = %status, error = %remote, "Push aborted");
                return Step::Abort(status, None);
            }
        }

        let (status_code, raw_result) = match &err {
            SyncError::Remote(RemoteError::Status { status, body }) => (Some(*status), body.clone()),
            other => (None, Some(other.to_string())),
        };

        warn!(
            op_id = %op.id(),
            table = %op.table_name(),
            status = ?status_code,
            error = %err,
            "Operation failed"
        );

        let failure = OperationError::new(op, status_code, raw_result);
        match self.queue_store.save_error(&failure.to_record()).await {
            Ok(()) => Step::Failed,
            Err(e) => store_abort(op.id(), e),
        }
    }

    /// Remote failures that stop the whole pass instead of one item.
    fn abort_status(&self, err: &RemoteError) -> Option<PushStatus> {
        match err {
            RemoteError::Network(_) if self.config.abort_on_network_error => {
                Some(PushStatus::CancelledByNetworkError)
            }
            RemoteError::Aborted(_) => Some(PushStatus::CancelledByOperation),
            _ if err.is_authentication() => Some(PushStatus::CancelledByAuthenticationError),
            _ => None,
        }
    }
}

fn store_abort(id: &str, err: StoreError) -> Step {
    error!(op_id = %id, error = %err, "Sync store failed, stopping push");
    Step::Abort(PushStatus::CancelledBySyncStoreError, Some(err.into()))
}
