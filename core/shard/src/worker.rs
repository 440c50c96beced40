//! Callback invoked by queue processors for every task read from persistence.
use anyhow::Result;

use queuecore_context::Context;
use queuecore_queue::model::Task;

/// Executes a single task's payload.
///
/// Registered once per process and shared across every shard's processors. An error marked
/// with [`AbandonTask`](queuecore_queue::error::AbandonTask) (via `anyhow::Error::is` on the
/// error chain) is treated as a permanent failure: the task is acked rather than retried.
#[async_trait::async_trait]
pub trait TaskWorker: Send + Sync {
    async fn handle(&self, context: &Context, task: &Task) -> Result<()>;
}

/// True if `error`'s chain contains an [`AbandonTask`](queuecore_queue::error::AbandonTask)
/// marker, meaning the task should be acked instead of retried.
pub fn is_abandoned(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.is::<queuecore_queue::error::AbandonTask>())
}
