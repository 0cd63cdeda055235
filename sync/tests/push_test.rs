//! Push pass tests against recording remote and store doubles.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{item, Harness, RecordingRemote, StoreWrite};
use opqueue_engine::{
    item::{into_item, Item},
    Operation, OperationKind, ResponseStatus,
};
use opqueue_sync::{
    execute_remote, CancelToken, DefaultSyncHandler, MemoryStore, PushCompletion, PushOptions,
    PushStatus, QueueStore, RemoteError, RemoteTable, SyncConfig, SyncContext, SyncError,
    SyncHandler,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

// ============================================================================
// Successful Execution
// ============================================================================

#[tokio::test]
async fn insert_stores_server_record_once() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.local.clear_writes();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::Complete);
    assert_eq!(completion.succeeded, 1);
    assert!(completion.errors.is_empty());

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, OperationKind::Insert);
    assert_eq!(calls[0].item, item("a", "milk"));

    // __updatedAt is dropped, __version kept
    let stored = into_item(json!({"id": "a", "text": "milk", "__version": "server-v1"})).unwrap();
    assert_eq!(
        h.local.writes(),
        vec![StoreWrite::Upsert {
            table: "todos".into(),
            items: vec![stored],
            allow_conflict_overwrite: false,
        }]
    );

    assert_eq!(h.context.count_pending("todos").await, 0);
    assert_eq!(h.log.operation_count(), 0);
}

#[tokio::test]
async fn delete_removes_item_locally_once() {
    let h = Harness::new().await;
    let mut doomed = item("a", "milk");
    doomed.insert("__version".into(), json!("v7"));
    h.context.delete("todos", doomed).await.unwrap();
    h.local.clear_writes();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);

    let calls = h.remote.calls();
    assert_eq!(calls[0].kind, OperationKind::Delete);
    assert_eq!(calls[0].item["__version"], json!("v7"));
    assert_eq!(
        h.local.writes(),
        vec![StoreWrite::Delete {
            table: "todos".into(),
            id: "a".into(),
        }]
    );
}

#[tokio::test]
async fn delete_of_record_missing_remotely_succeeds() {
    let h = Harness::new().await;
    h.remote.fail("a", 404, json!({"error": "not found"}));
    h.context.delete("todos", item("a", "milk")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);
    assert!(completion.errors.is_empty());
    assert!(h.context.pending_operations().await.is_empty());
}

#[tokio::test]
async fn no_content_result_writes_nothing() {
    let h = Harness::new().await;
    h.remote.respond("a", Ok(None));
    h.context.update("todos", item("a", "milk")).await.unwrap();
    h.local.clear_writes();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);
    assert!(h.local.writes().is_empty());
    assert!(h.context.pending_operations().await.is_empty());
}

#[tokio::test]
async fn cancelled_operations_trigger_nothing() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.update("todos", item("a", "oat milk")).await.unwrap();
    h.context.delete("todos", item("a", "oat milk")).await.unwrap();
    h.local.clear_writes();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 0);
    assert_eq!(h.remote.call_count(), 0);
    assert!(h.local.writes().is_empty());
}

#[tokio::test]
async fn update_then_delete_sends_only_the_delete() {
    let h = Harness::new().await;
    h.context.update("todos", item("a", "milk")).await.unwrap();
    h.context.delete("todos", item("a", "milk")).await.unwrap();

    let pending = h.context.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), OperationKind::Delete);
    assert_eq!(pending[0].version(), 2);

    h.context.push().await.unwrap();
    let kinds: Vec<_> = h.remote.calls().into_iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![OperationKind::Delete]);
}

#[tokio::test]
async fn operations_run_in_sequence_order() {
    let h = Harness::new().await;
    h.context.insert("todos", item("b", "first")).await.unwrap();
    h.context.insert("notes", item("a", "second")).await.unwrap();
    h.context.update("todos", item("b", "absorbed")).await.unwrap();
    h.context.insert("todos", item("c", "third")).await.unwrap();

    h.context.push().await.unwrap();
    let sent: Vec<_> = h
        .remote
        .calls()
        .into_iter()
        .map(|c| (c.table, c.item["text"].clone()))
        .collect();
    assert_eq!(
        sent,
        vec![
            ("todos".to_string(), json!("absorbed")),
            ("notes".to_string(), json!("second")),
            ("todos".to_string(), json!("third")),
        ]
    );
}

// ============================================================================
// Per-item Failures
// ============================================================================

async fn context_with_log(log: Arc<MemoryStore>, remote: Arc<RecordingRemote>) -> (SyncContext, Arc<MemoryStore>) {
    let local = MemoryStore::new_shared();
    let context = SyncContext::with_defaults(local.clone(), log, remote);
    context.initialize().await.unwrap();
    (context, local)
}

#[tokio::test]
async fn missing_item_fails_without_network_call() {
    let log = MemoryStore::new_shared();
    let mut record = Operation::delete("op-1", "todos", "a", None, 0).to_record();
    record.sequence = 1;
    log.save_operation(&record).await.unwrap();

    let remote = Arc::new(RecordingRemote::new());
    let (context, _) = context_with_log(log.clone(), remote.clone()).await;

    let completion = context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::Complete);
    assert_eq!(remote.call_count(), 0);

    assert_eq!(completion.errors.len(), 1);
    let error = &completion.errors[0];
    assert_eq!(error.id, "op-1");
    assert_eq!(error.status_code, None);
    assert!(error.raw_result.as_deref().unwrap().contains("must have an item"));

    // the failed operation stays queued
    assert_eq!(context.count_pending("todos").await, 1);
    assert_eq!(log.error_count(), 0);
}

#[tokio::test]
async fn absent_item_is_loaded_from_local_store() {
    let log = MemoryStore::new_shared();
    let mut record = Operation::new("op-1", OperationKind::Update, "todos", "a", None, 0).to_record();
    record.sequence = 1;
    log.save_operation(&record).await.unwrap();

    let remote = Arc::new(RecordingRemote::new());
    let (context, local) = context_with_log(log, remote.clone()).await;
    opqueue_sync::LocalStore::upsert(local.as_ref(), "todos", &[item("a", "stored")], true)
        .await
        .unwrap();

    let completion = context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);
    assert_eq!(remote.calls()[0].item, item("a", "stored"));
}

#[tokio::test]
async fn list_response_is_unexpected_and_not_stored() {
    let h = Harness::new().await;
    h.remote
        .respond("a", Ok(Some(json!([{"id": "a"}, {"id": "b"}]))));
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.local.clear_writes();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 0);
    assert_eq!(completion.errors.len(), 1);
    assert!(completion.errors[0]
        .raw_result
        .as_deref()
        .unwrap()
        .contains("list of 2"));

    assert!(h.local.writes().is_empty());
    assert_eq!(h.context.count_pending("todos").await, 1);
}

#[tokio::test]
async fn failure_does_not_block_other_items() {
    let h = Harness::new().await;
    h.remote.fail("a", 500, json!({"error": "boom"}));
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.insert("todos", item("b", "bread")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::Complete);
    assert_eq!(completion.succeeded, 1);
    assert_eq!(completion.errors.len(), 1);
    assert_eq!(completion.errors[0].status(), ResponseStatus::ServerError);
    assert_eq!(completion.errors[0].item_id(), Some("a"));

    let pending: Vec<_> = h
        .context
        .pending_operations()
        .await
        .into_iter()
        .map(|op| op.item_id().clone())
        .collect();
    assert_eq!(pending, vec!["a"]);

    // the next pass retries it
    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);
    assert!(completion.errors.is_empty());
}

#[tokio::test]
async fn conflict_carries_server_record() {
    let h = Harness::new().await;
    let server = json!({"id": "a", "text": "server", "__version": "s2"});
    h.remote.fail("a", 412, server.clone());
    h.context.update("todos", item("a", "local")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    let error = &completion.errors[0];
    assert!(error.is_conflict());
    assert_eq!(error.operation_version, 1);
    assert_eq!(error.operation_kind, OperationKind::Update);
    assert_eq!(error.item, Some(item("a", "local")));
    assert_eq!(error.result.clone().map(Value::Object), Some(server));
    assert_eq!(h.log.error_count(), 0);
}

// ============================================================================
// Aborted Passes
// ============================================================================

#[tokio::test]
async fn network_error_aborts_the_pass() {
    let h = Harness::new().await;
    h.remote
        .respond("a", Err(RemoteError::Network("offline".into())));
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.insert("todos", item("b", "bread")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::CancelledByNetworkError);
    assert!(completion.errors.is_empty());
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.context.count_pending("todos").await, 2);

    assert!(matches!(
        completion.ensure_complete(),
        Err(SyncError::PushAborted(PushStatus::CancelledByNetworkError))
    ));
}

#[tokio::test]
async fn network_error_can_be_recorded_per_item() {
    let config = SyncConfig {
        abort_on_network_error: false,
        ..SyncConfig::default()
    };
    let h = Harness::with_config(config).await;
    h.remote
        .respond("a", Err(RemoteError::Network("offline".into())));
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.insert("todos", item("b", "bread")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::Complete);
    assert_eq!(completion.succeeded, 1);
    assert_eq!(
        completion.errors[0].raw_result.as_deref(),
        Some("network error: offline")
    );
}

#[tokio::test]
async fn authentication_error_aborts_the_pass() {
    let h = Harness::new().await;
    h.remote.fail("a", 401, json!({"error": "expired"}));
    h.context.insert("todos", item("a", "milk")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::CancelledByAuthenticationError);
    assert!(completion.errors.is_empty());
    assert_eq!(h.context.count_pending("todos").await, 1);
}

#[tokio::test]
async fn store_failure_aborts_and_keeps_operation() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.insert("todos", item("b", "bread")).await.unwrap();
    h.local.set_failing(true);

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::CancelledBySyncStoreError);
    assert_eq!(completion.other_errors.len(), 1);
    assert!(matches!(completion.other_errors[0], SyncError::LocalStore(_)));
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.context.count_pending("todos").await, 2);
    assert_eq!(h.log.operation_count(), 2);

    h.local.set_failing(false);
    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 2);
    assert_eq!(h.remote.call_count(), 3);
}

#[tokio::test]
async fn cancel_token_stops_before_next_operation() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();

    let token = CancelToken::new();
    token.cancel();
    let completion = h
        .context
        .push_with(&PushOptions::default(), &token)
        .await
        .unwrap();

    assert_eq!(completion.status, PushStatus::CancelledByToken);
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.context.count_pending("todos").await, 1);
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn push_can_be_limited_to_tables() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();
    h.context.insert("notes", item("b", "call mom")).await.unwrap();

    let options = PushOptions::new().with_tables(["notes"]);
    let completion = h
        .context
        .push_with(&options, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(completion.succeeded, 1);
    assert_eq!(h.remote.calls()[0].table, "notes");
    assert_eq!(h.context.count_pending("todos").await, 1);
    assert_eq!(h.context.count_pending("notes").await, 0);
}

#[tokio::test]
async fn push_can_be_limited_to_table_kind() {
    let h = Harness::new().await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();

    let options = PushOptions::new().with_table_kind(opqueue_engine::TableKind::File);
    let completion = h
        .context
        .push_with(&options, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(completion.status, PushStatus::Complete);
    assert_eq!(completion.succeeded, 0);
    assert_eq!(h.remote.call_count(), 0);
}

// ============================================================================
// Sync Handler
// ============================================================================

/// Retries a conflicting operation with the server's version.
struct ClientWins;

#[async_trait]
impl SyncHandler for ClientWins {
    async fn execute_table_operation(
        &self,
        remote: &dyn RemoteTable,
        operation: &mut Operation,
    ) -> opqueue_sync::Result<Option<Item>> {
        match execute_remote(remote, operation).await {
            Err(SyncError::Remote(e)) if e.is_conflict() => {
                let server: Value = serde_json::from_str(e.body().unwrap_or("{}"))?;
                let mut retry = operation.item().cloned().unwrap_or_default();
                if let Some(version) = server.get("__version") {
                    retry.insert("__version".into(), version.clone());
                }
                operation.set_item(Some(retry));
                execute_remote(remote, operation).await
            }
            other => other,
        }
    }
}

#[tokio::test]
async fn handler_can_retry_conflicts() {
    let h = Harness::with_handler(Arc::new(ClientWins)).await;
    h.remote
        .fail("a", 412, json!({"id": "a", "text": "server", "__version": "s2"}));
    h.context.update("todos", item("a", "local")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.succeeded, 1);
    assert!(completion.errors.is_empty());

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].item["__version"], json!("s2"));
    assert_eq!(calls[1].item["text"], json!("local"));
}

struct Aborting;

#[async_trait]
impl SyncHandler for Aborting {
    async fn execute_table_operation(
        &self,
        _remote: &dyn RemoteTable,
        _operation: &mut Operation,
    ) -> opqueue_sync::Result<Option<Item>> {
        Err(RemoteError::Aborted("maintenance window".into()).into())
    }
}

#[tokio::test]
async fn handler_can_abort_the_pass() {
    let h = Harness::with_handler(Arc::new(Aborting)).await;
    h.context.insert("todos", item("a", "milk")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.status, PushStatus::CancelledByOperation);
    assert!(completion.errors.is_empty());
    assert_eq!(h.context.count_pending("todos").await, 1);
}

/// Fails the first completion hook, leaving the pass's errors stored.
#[derive(Default)]
struct FailsFirstCompletion {
    failed: std::sync::atomic::AtomicBool,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SyncHandler for FailsFirstCompletion {
    async fn on_push_complete(&self, completion: &mut PushCompletion) -> opqueue_sync::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .extend(completion.errors.iter().map(|error| error.id.clone()));
        if self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("hook offline".into()).into())
        }
    }
}

#[tokio::test]
async fn superseded_operation_error_is_not_reported_again() {
    let handler = Arc::new(FailsFirstCompletion::default());
    let h = Harness::with_handler(handler.clone()).await;
    h.remote.fail("a", 409, json!({"id": "a", "text": "server"}));
    h.context.update("todos", item("a", "local")).await.unwrap();
    let update_id = h.context.pending_operations().await[0].id().clone();

    assert!(h.context.push().await.is_err());
    assert_eq!(h.log.error_count(), 1);

    h.context.delete("todos", item("a", "local")).await.unwrap();
    assert_eq!(h.log.error_count(), 0);

    let completion = h.context.push().await.unwrap();
    assert!(completion.errors.is_empty());
    assert_eq!(completion.succeeded, 1);
    assert_eq!(*handler.seen.lock().unwrap(), vec![update_id]);
}

/// Marks every error handled and remembers how many it saw.
#[derive(Default)]
struct Observing {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl SyncHandler for Observing {
    async fn on_push_complete(&self, completion: &mut PushCompletion) -> opqueue_sync::Result<()> {
        for error in &mut completion.errors {
            self.seen.lock().unwrap().push(error.id.clone());
            error.handled = true;
        }
        Ok(())
    }
}

#[tokio::test]
async fn completion_hook_sees_errors_from_earlier_passes() {
    let handler = Arc::new(Observing::default());
    let h = Harness::with_handler(handler.clone()).await;

    // left behind by an interrupted pass
    let stale = opqueue_engine::OperationError::new(
        &Operation::update("op-old", "todos", "z", item("z", "old"), 0),
        Some(500),
        None,
    );
    h.log.save_error(&stale.to_record()).await.unwrap();

    h.remote.fail("a", 409, json!({}));
    h.context.insert("todos", item("a", "milk")).await.unwrap();

    let completion = h.context.push().await.unwrap();
    assert_eq!(completion.errors.len(), 2);
    assert_eq!(completion.unhandled_errors().count(), 0);
    assert!(handler.seen.lock().unwrap().contains(&"op-old".to_string()));
    assert_eq!(h.log.error_count(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn mutation_waits_for_in_flight_push_of_same_item() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let h = Harness::with_remote(RecordingRemote::gated(started.clone(), release.clone())).await;
    h.context.insert("todos", item("a", "first")).await.unwrap();

    let push = h.context.push();
    let edit = async {
        started.notified().await;
        // the push holds the item lock until its result is applied
        release.notify_one();
        h.context.update("todos", item("a", "second")).await
    };
    let (completion, edited) = futures::join!(push, edit);

    assert_eq!(completion.unwrap().succeeded, 1);
    assert!(matches!(
        edited.unwrap(),
        opqueue_engine::Enqueued::Appended { .. }
    ));

    assert_eq!(h.remote.calls()[0].item["text"], json!("first"));
    let pending = h.context.pending_operations().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), OperationKind::Update);
    assert_eq!(pending[0].item().unwrap()["text"], json!("second"));
}

#[tokio::test]
async fn push_requires_initialization() {
    let store = MemoryStore::new_shared();
    let context = SyncContext::new(
        store.clone(),
        store,
        Arc::new(RecordingRemote::new()),
        Arc::new(DefaultSyncHandler),
        SyncConfig::default(),
    );

    assert!(matches!(context.push().await, Err(SyncError::NotInitialized)));
    assert!(matches!(
        context.insert("todos", item("a", "milk")).await,
        Err(SyncError::NotInitialized)
    ));
}
