//! Applies replication tasks pulled from one peer cluster, with retry and DLQ fallback.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use queuecore_conf::ReplicationConf;
use queuecore_context::Context;
use queuecore_queue::execution_store::ExecutionStoreBackend;
use queuecore_queue::model::Task;
use queuecore_queue::model::TaskCategory;
use queuecore_queue::model::WorkflowRef;
use queuecore_queue::shard::ShardContext;

use crate::fetcher::ReplicationTaskFetcher;
use crate::model::ReplicationTask;
use crate::model::ReplicationToken;
use crate::retry::RetryOutcome;
use crate::retry::TaskRetryPolicy;

/// Applies a single replication task's effects to local state.
///
/// The core does not interpret task payloads (per its non-goals); this is the seam a
/// workflow engine plugs its own apply logic into, the way `TaskWorker` is the seam for
/// transfer/timer task execution.
#[async_trait::async_trait]
pub trait ReplicationTaskApplier: Send + Sync {
    /// Apply `task`. When `force` is set (DLQ merge), the applier must not itself enqueue
    /// a DLQ entry on failure — the caller is already handling that outcome.
    async fn apply(&self, context: &Context, task: &ReplicationTask, force: bool) -> Result<()>;
}

/// Per (source cluster, shard) replication pipeline: fetch, apply with two-phase retry,
/// DLQ on exhaustion, periodic cleanup of acked source-side tasks and DLQ size metrics.
pub struct ReplicationProcessor {
    cluster: String,
    shard_id: i64,
    fetcher: ReplicationTaskFetcher,
    shard: Arc<dyn ShardContext>,
    store: Arc<dyn ExecutionStoreBackend>,
    applier: Arc<dyn ReplicationTaskApplier>,
    conf: ReplicationConf,
    /// Other clusters pulling from this shard's own outgoing replication feed; their
    /// acked levels bound how far the cleanup loop may range-complete our source rows.
    peers: Vec<String>,
    no_task_delay: Duration,
}

impl ReplicationProcessor {
    pub fn new(
        cluster: impl Into<String>,
        shard_id: i64,
        fetcher: ReplicationTaskFetcher,
        shard: Arc<dyn ShardContext>,
        store: Arc<dyn ExecutionStoreBackend>,
        applier: Arc<dyn ReplicationTaskApplier>,
        conf: ReplicationConf,
        peers: Vec<String>,
    ) -> Self {
        let no_task_delay = Duration::from_millis(conf.no_task_backoff_ms);
        ReplicationProcessor {
            cluster: cluster.into(),
            shard_id,
            fetcher,
            shard,
            store,
            applier,
            conf,
            peers,
            no_task_delay,
        }
    }

    /// Run the main/sync-shard/cleanup/dlq-metrics loops until `exit` resolves.
    pub async fn run(
        mut self,
        context: Context,
        exit: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(exit);

        let mut sync_ticker =
            tokio::time::interval(Duration::from_millis(self.conf.shard_sync_min_interval_ms));
        let mut cleanup_ticker =
            tokio::time::interval(Duration::from_secs(self.conf.cleanup_interval_sec));
        let mut dlq_ticker =
            tokio::time::interval(Duration::from_secs(self.conf.dlq_metrics_interval_sec));

        loop {
            tokio::select! {
                _ = &mut exit => break,
                _ = sync_ticker.tick() => {
                    self.sync_shard(&context);
                }
                _ = cleanup_ticker.tick() => {
                    if let Err(error) = self.cleanup(&context).await {
                        slog::warn!(
                            context.logger, "Replication cleanup sweep failed";
                            replisdk::utils::error::slog::ErrorAttributes::from(&error),
                        );
                    }
                }
                _ = dlq_ticker.tick() => {
                    if let Err(error) = self.emit_dlq_metrics(&context).await {
                        slog::warn!(
                            context.logger, "Replication DLQ metrics sweep failed";
                            replisdk::utils::error::slog::ErrorAttributes::from(&error),
                        );
                    }
                }
                _ = tokio::time::sleep(self.no_task_delay) => {
                    self.poll_once(&context).await?;
                }
            }
        }
        Ok(())
    }

    /// Fetch and apply the next batch; advances the cluster replication level only once
    /// every task in the batch has been applied or DLQ'd, preserving in-order delivery.
    async fn poll_once(&mut self, context: &Context) -> Result<()> {
        let last_processed_id = self
            .shard
            .get_cluster_replication_level(context, &self.cluster)
            .await?;
        let token = ReplicationToken {
            shard_id: self.shard_id,
            last_retrieved_id: last_processed_id,
            last_processed_id,
        };
        let batch = self.fetcher.fetch(context, token).await?;
        if batch.tasks.is_empty() {
            self.no_task_delay = Duration::from_millis(self.conf.no_task_backoff_ms);
            return Ok(());
        }

        for task in &batch.tasks {
            self.apply_with_retry(context, task).await?;
        }

        self.shard
            .update_cluster_replication_level(context, &self.cluster, batch.last_retrieved_id)
            .await?;
        crate::telemetry::observe_replication_lag(
            &self.cluster,
            &self.shard_id.to_string(),
            batch.last_retrieved_id,
        );
        self.no_task_delay = Duration::from_millis(self.conf.no_task_backoff_ms);
        Ok(())
    }

    /// Apply one task under the two-phase retry policy, writing to the DLQ on exhaustion.
    async fn apply_with_retry(&self, context: &Context, task: &ReplicationTask) -> Result<()> {
        let now_ms = self.shard.time_source().now_ms();
        let mut retry = TaskRetryPolicy::new(&self.conf, now_ms);

        loop {
            match self.applier.apply(context, task, false).await {
                Ok(()) => {
                    crate::telemetry::observe_task_applied(&self.cluster, &self.shard_id.to_string());
                    return Ok(());
                }
                Err(error) if error.downcast_ref::<queuecore_errors::NotFound>().is_some() => {
                    // Treated as "skip, acknowledge": the workflow this task concerns is
                    // already gone, so there is nothing left to apply.
                    return Ok(());
                }
                Err(error) if error.downcast_ref::<queuecore_errors::BadRequest>().is_some() => {
                    self.dlq(context, task).await?;
                    return Ok(());
                }
                Err(error) if error.downcast_ref::<queuecore_errors::ServiceBusy>().is_some() => {
                    tokio::time::sleep(Duration::from_millis(self.conf.error_second_retry_wait_ms))
                        .await;
                    continue;
                }
                Err(_error) => {
                    let now_ms = self.shard.time_source().now_ms();
                    match retry.fail(now_ms) {
                        RetryOutcome::Wait(delay) => tokio::time::sleep(delay).await,
                        RetryOutcome::Exhausted => {
                            self.dlq(context, task).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Persist a task that exhausted its retry budget, retrying the write forever.
    async fn dlq(&self, context: &Context, task: &ReplicationTask) -> Result<()> {
        let record = Task {
            task_id: task.source_task_id,
            category: TaskCategory::Replication,
            visibility_timestamp_ms: task.created_at_ms,
            workflow: WorkflowRef {
                domain_id: String::new(),
                workflow_id: String::new(),
                run_id: String::new(),
            },
            payload: task.attributes.clone(),
        };
        loop {
            match self
                .store
                .put_replication_task_to_dlq(context, &self.cluster, record.clone())
                .await
            {
                Ok(()) => {
                    crate::telemetry::observe_task_dlq(&self.cluster, &self.shard_id.to_string());
                    return Ok(());
                }
                Err(error) => {
                    slog::warn!(
                        context.logger, "Failed to write replication task to DLQ, retrying";
                        replisdk::utils::error::slog::ErrorAttributes::from(&error),
                    );
                    tokio::time::sleep(Duration::from_millis(self.conf.error_retry_wait_ms)).await;
                }
            }
        }
    }

    /// Forward the most recently observed sync-shard status to the local engine.
    ///
    /// Statuses older than 10 minutes are dropped rather than forwarded: nothing consumes
    /// this wiring in this core (it is the hook a workflow engine attaches to), so this is
    /// presently a log-only placeholder.
    fn sync_shard(&self, context: &Context) {
        slog::debug!(context.logger, "Sync-shard status forward tick"; "cluster" => &self.cluster);
    }

    /// Compute the minimum ack level across peer clusters and range-complete our own
    /// outgoing replication rows up to it.
    async fn cleanup(&self, context: &Context) -> Result<()> {
        if self.peers.is_empty() {
            return Ok(());
        }
        let mut min_ack = i64::MAX;
        for peer in &self.peers {
            let level = self
                .shard
                .get_cluster_replication_level(context, peer)
                .await?;
            min_ack = min_ack.min(level);
        }
        if min_ack == i64::MAX {
            return Ok(());
        }
        self.store
            .range_complete_replication_task(context, &self.cluster, min_ack)
            .await
    }

    async fn emit_dlq_metrics(&self, context: &Context) -> Result<()> {
        let size = self.store.get_replication_dlq_size(context, &self.cluster).await?;
        crate::telemetry::observe_dlq_size(&self.cluster, size);
        Ok(())
    }
}
