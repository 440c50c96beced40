//! Pulls batches of replication messages from a single peer cluster.
use std::sync::Arc;

use anyhow::Result;
use opentelemetry_api::trace::FutureExt;

use replisdk::utils::metrics::CountFutureErrExt;
use replisdk::utils::trace::TraceFutureStdErrExt;

use queuecore_context::Context;

use crate::model::ReplicationMessageBatch;
use crate::model::ReplicationToken;
use crate::peer::PeerAdminClient;

/// Issues `ReplicationToken` requests against one peer cluster's admin surface.
///
/// One instance per (source cluster, shard), held by the [`crate::processor::ReplicationProcessor`]
/// that owns the corresponding shard.
pub struct ReplicationTaskFetcher {
    client: Arc<dyn PeerAdminClient>,
    cluster: String,
}

impl ReplicationTaskFetcher {
    pub fn new(cluster: impl Into<String>, client: Arc<dyn PeerAdminClient>) -> Self {
        ReplicationTaskFetcher {
            client,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Fetch the next batch for `token`. Returns an empty batch if the peer has nothing new.
    pub async fn fetch(
        &self,
        context: &Context,
        token: ReplicationToken,
    ) -> Result<ReplicationMessageBatch> {
        let (err_count, _timer) = crate::telemetry::observe_op("get_replication_messages");
        let trace = crate::telemetry::trace_op("replication.fetch");
        let mut batches = self
            .client
            .get_replication_messages(context, &self.cluster, std::slice::from_ref(&token))
            .count_on_err(err_count)
            .trace_on_err_with_status()
            .with_context(trace)
            .await?;
        Ok(batches.pop().unwrap_or(ReplicationMessageBatch {
            tasks: Vec::new(),
            last_retrieved_id: token.last_retrieved_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use queuecore_context::Context;

    use super::ReplicationTaskFetcher;
    use crate::model::ReplicationTask;
    use crate::model::ReplicationTaskType;
    use crate::model::ReplicationToken;
    use crate::peer::PeerAdminClientFixture;

    fn task(id: i64) -> ReplicationTask {
        ReplicationTask {
            source_task_id: id,
            task_type: ReplicationTaskType::Transfer,
            created_at_ms: 0,
            attributes: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn fetch_returns_tasks_past_the_token() {
        let context = Context::fixture();
        let client = Arc::new(PeerAdminClientFixture::new(
            vec![task(1), task(2), task(3)],
            10,
        ));
        let fetcher = ReplicationTaskFetcher::new("cluster-a", client);

        let token = ReplicationToken {
            shard_id: 0,
            last_retrieved_id: 1,
            last_processed_id: 1,
        };
        let batch = fetcher.fetch(&context, token).await.unwrap();
        assert_eq!(batch.tasks.len(), 2);
        assert_eq!(batch.last_retrieved_id, 3);
    }
}
