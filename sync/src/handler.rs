//! Hook for customizing how a push executes operations and reports results.

use async_trait::async_trait;
use opqueue_engine::{item::Item, Operation};

use crate::{
    push::PushCompletion,
    remote::{execute_remote, RemoteTable},
    Result,
};

/// Policy applied by the sync context during a push.
///
/// Override `execute_table_operation` to resolve conflicts on the fly, for
/// example by retrying a rejected update with the server's `__version`
/// (client wins). Returning [`crate::RemoteError::Aborted`] stops the pass
/// with the operation left queued.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Send one operation to the remote and return the record to store locally.
    async fn execute_table_operation(
        &self,
        remote: &dyn RemoteTable,
        operation: &mut Operation,
    ) -> Result<Option<Item>> {
        execute_remote(remote, operation).await
    }

    /// Called once per pass, before stored errors are cleared.
    ///
    /// Errors left unhandled are still dropped from the store afterwards; the
    /// operations they belong to stay queued.
    async fn on_push_complete(&self, _completion: &mut PushCompletion) -> Result<()> {
        Ok(())
    }
}

/// Handler with the default behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSyncHandler;

#[async_trait]
impl SyncHandler for DefaultSyncHandler {}
