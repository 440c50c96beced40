//! Reads, purges and merges replication tasks parked in a cluster's dead-letter queue.
use std::sync::Arc;

use anyhow::Result;

use queuecore_context::Context;
use queuecore_queue::execution_store::ExecutionStoreBackend;

use crate::error::InvalidCluster;
use crate::model::ReplicationTask;
use crate::model::ReplicationTaskType;
use crate::model::TaskInfo;
use crate::peer::PeerAdminClient;
use crate::processor::ReplicationTaskApplier;

/// A page of DLQ tasks with their payloads re-fetched from the source cluster.
pub struct DlqPage {
    pub tasks: Vec<ReplicationTask>,
    pub next_page_token: Option<Vec<u8>>,
}

/// Operations over a shard's replication DLQ.
///
/// The local DLQ stores only a small descriptor; the full payload lives at the source
/// cluster until [`DLQHandler::merge_messages`] re-fetches and applies it.
pub struct DLQHandler {
    shard_id: i64,
    clusters: Vec<String>,
    store: Arc<dyn ExecutionStoreBackend>,
    peer: Arc<dyn PeerAdminClient>,
    applier: Arc<dyn ReplicationTaskApplier>,
}

impl DLQHandler {
    pub fn new(
        shard_id: i64,
        clusters: Vec<String>,
        store: Arc<dyn ExecutionStoreBackend>,
        peer: Arc<dyn PeerAdminClient>,
        applier: Arc<dyn ReplicationTaskApplier>,
    ) -> Self {
        DLQHandler {
            shard_id,
            clusters,
            store,
            peer,
            applier,
        }
    }

    fn check_cluster(&self, cluster: &str) -> Result<()> {
        if self.clusters.iter().any(|c| c == cluster) {
            Ok(())
        } else {
            Err(InvalidCluster::new(cluster).into())
        }
    }

    /// Read DLQ descriptors and re-fetch their full payload from the source cluster.
    pub async fn read_messages(
        &self,
        context: &Context,
        cluster: &str,
        last_id: i64,
        page_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<DlqPage> {
        self.check_cluster(cluster)?;
        let page = self
            .store
            .get_replication_tasks_from_dlq(context, cluster, last_id, page_size, page_token)
            .await?;
        let infos: Vec<TaskInfo> = page
            .tasks
            .iter()
            .map(|task| TaskInfo {
                cluster: cluster.to_string(),
                shard_id: self.shard_id,
                source_task_id: task.task_id,
                task_type: ReplicationTaskType::Replication,
            })
            .collect();
        let tasks = self
            .peer
            .get_dlq_replication_messages(context, cluster, &infos)
            .await?;
        Ok(DlqPage {
            tasks,
            next_page_token: page.next_page_token,
        })
    }

    /// Delete DLQ rows up to and including `last_id`, without re-executing them.
    pub async fn purge_messages(&self, context: &Context, cluster: &str, last_id: i64) -> Result<()> {
        self.check_cluster(cluster)?;
        self.store
            .range_delete_replication_task_from_dlq(context, cluster, last_id)
            .await
    }

    /// Re-fetch, force-apply and delete DLQ rows up to the highest ID that applied cleanly.
    ///
    /// Stops at the first error and returns it; the caller retries with the same
    /// `page_token`, so nothing already merged is re-applied.
    pub async fn merge_messages(
        &self,
        context: &Context,
        cluster: &str,
        last_id: i64,
        page_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        self.check_cluster(cluster)?;
        let page = self.read_messages(context, cluster, last_id, page_size, page_token).await?;

        let mut max_applied: Option<i64> = None;
        for task in &page.tasks {
            self.applier.apply(context, task, true).await?;
            max_applied = Some(task.source_task_id);
        }

        if let Some(max_applied) = max_applied {
            self.store
                .range_delete_replication_task_from_dlq(context, cluster, max_applied)
                .await?;
        }
        Ok(page.next_page_token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use anyhow::Result;

    use queuecore_context::Context;
    use queuecore_queue::execution_store::ExecutionStoreFixture;
    use queuecore_queue::model::Task;
    use queuecore_queue::model::TaskCategory;
    use queuecore_queue::model::WorkflowRef;

    use super::DLQHandler;
    use crate::model::ReplicationTask;
    use crate::model::ReplicationTaskType;
    use crate::peer::PeerAdminClientFixture;
    use crate::processor::ReplicationTaskApplier;

    struct CountingApplier(AtomicUsize);

    #[async_trait::async_trait]
    impl ReplicationTaskApplier for CountingApplier {
        async fn apply(&self, _: &Context, _: &ReplicationTask, _: bool) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dlq_record(id: i64) -> Task {
        Task {
            task_id: id,
            category: TaskCategory::Replication,
            visibility_timestamp_ms: 0,
            workflow: WorkflowRef {
                domain_id: String::new(),
                workflow_id: String::new(),
                run_id: String::new(),
            },
            payload: serde_json::Value::Null,
        }
    }

    fn wire_task(id: i64) -> ReplicationTask {
        ReplicationTask {
            source_task_id: id,
            task_type: ReplicationTaskType::Replication,
            created_at_ms: 0,
            attributes: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn unknown_cluster_is_rejected() {
        let context = Context::fixture();
        let store = Arc::new(ExecutionStoreFixture::new());
        let peer = Arc::new(PeerAdminClientFixture::new(Vec::new(), 10));
        let applier = Arc::new(CountingApplier(AtomicUsize::new(0)));
        let handler = DLQHandler::new(0, vec!["known".into()], store, peer, applier);

        let result = handler.purge_messages(&context, "unknown", 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn merge_messages_applies_and_clears_dlq() {
        let context = Context::fixture();
        let store = Arc::new(ExecutionStoreFixture::new());
        store
            .put_replication_task_to_dlq(&context, "peer-a", dlq_record(1))
            .await
            .unwrap();
        store
            .put_replication_task_to_dlq(&context, "peer-a", dlq_record(2))
            .await
            .unwrap();

        let peer = Arc::new(PeerAdminClientFixture::new(Vec::new(), 10));
        peer.seed_dlq_payloads(vec![wire_task(1), wire_task(2)]).await;
        let applier = Arc::new(CountingApplier(AtomicUsize::new(0)));
        let handler = DLQHandler::new(0, vec!["peer-a".into()], store.clone(), peer, applier.clone());

        handler
            .merge_messages(&context, "peer-a", -1, 10, None)
            .await
            .unwrap();

        assert_eq!(applier.0.load(Ordering::SeqCst), 2);
        assert_eq!(
            store.get_replication_dlq_size(&context, "peer-a").await.unwrap(),
            0
        );
    }
}
