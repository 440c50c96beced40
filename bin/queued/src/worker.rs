//! Placeholder task execution and replication application.
//!
//! The core does not interpret task payloads (`TaskWorker`/`ReplicationTaskApplier` are the
//! seams a workflow engine plugs into); this binary has no such engine wired in, so it ships
//! implementations that ack every task it sees without acting on it, logging what it skipped.
use anyhow::Result;

use queuecore_context::Context;
use queuecore_queue::model::Task;
use queuecore_replication::model::ReplicationTask;
use queuecore_shard::worker::TaskWorker;

/// Acks every transfer/timer task without executing its payload.
pub struct LoggingTaskWorker;

#[async_trait::async_trait]
impl TaskWorker for LoggingTaskWorker {
    async fn handle(&self, context: &Context, task: &Task) -> Result<()> {
        slog::debug!(
            context.logger, "skipping task execution: no workflow engine wired into this process";
            "task_id" => task.task_id, "category" => ?task.category,
        );
        Ok(())
    }
}

/// Acks every replication task without applying its effects.
pub struct NoopReplicationApplier;

#[async_trait::async_trait]
impl queuecore_replication::ReplicationTaskApplier for NoopReplicationApplier {
    async fn apply(&self, context: &Context, task: &ReplicationTask, _force: bool) -> Result<()> {
        slog::debug!(
            context.logger, "skipping replication task apply: no workflow engine wired into this process";
            "source_task_id" => task.source_task_id,
        );
        Ok(())
    }
}
