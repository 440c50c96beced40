//! In-memory [`PeerAdminClient`] for unit tests.
use anyhow::Result;
use tokio::sync::Mutex;

use queuecore_context::Context;

use super::PeerAdminClient;
use crate::model::ReplicationMessageBatch;
use crate::model::ReplicationTask;
use crate::model::ReplicationToken;
use crate::model::TaskInfo;

/// A [`PeerAdminClient`] backed by a fixed, pre-seeded task list.
///
/// Every call to [`get_replication_messages`](PeerAdminClient::get_replication_messages)
/// returns tasks with `source_task_id > token.last_retrieved_id`, up to `batch_size`.
pub struct PeerAdminClientFixture {
    tasks: Mutex<Vec<ReplicationTask>>,
    batch_size: usize,
    dlq_payloads: Mutex<Vec<ReplicationTask>>,
}

impl PeerAdminClientFixture {
    pub fn new(tasks: Vec<ReplicationTask>, batch_size: usize) -> Self {
        PeerAdminClientFixture {
            tasks: Mutex::new(tasks),
            batch_size,
            dlq_payloads: Mutex::new(Vec::new()),
        }
    }

    /// Seed the payloads a DLQ re-fetch should return for matching source task IDs.
    pub async fn seed_dlq_payloads(&self, tasks: Vec<ReplicationTask>) {
        *self.dlq_payloads.lock().await = tasks;
    }
}

#[async_trait::async_trait]
impl PeerAdminClient for PeerAdminClientFixture {
    async fn get_replication_messages(
        &self,
        _: &Context,
        _cluster: &str,
        tokens: &[ReplicationToken],
    ) -> Result<Vec<ReplicationMessageBatch>> {
        let tasks = self.tasks.lock().await;
        let mut batches = Vec::with_capacity(tokens.len());
        for token in tokens {
            let page: Vec<ReplicationTask> = tasks
                .iter()
                .filter(|t| t.source_task_id > token.last_retrieved_id)
                .take(self.batch_size)
                .cloned()
                .collect();
            let last_retrieved_id = page
                .last()
                .map(|t| t.source_task_id)
                .unwrap_or(token.last_retrieved_id);
            batches.push(ReplicationMessageBatch {
                tasks: page,
                last_retrieved_id,
            });
        }
        Ok(batches)
    }

    async fn get_dlq_replication_messages(
        &self,
        _: &Context,
        _cluster: &str,
        infos: &[TaskInfo],
    ) -> Result<Vec<ReplicationTask>> {
        let payloads = self.dlq_payloads.lock().await;
        let mut found = Vec::with_capacity(infos.len());
        for info in infos {
            if let Some(task) = payloads
                .iter()
                .find(|t| t.source_task_id == info.source_task_id)
            {
                found.push(task.clone());
            }
        }
        Ok(found)
    }
}
