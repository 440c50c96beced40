//! In-memory [`ExecutionStoreBackend`] for unit tests.
use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use queuecore_context::Context;

use super::ExecutionStoreBackend;
use super::TaskPage;
use crate::model::Task;

#[derive(Default)]
struct State {
    transfer: Vec<Task>,
    timer: Vec<Task>,
    replication: HashMap<String, Vec<Task>>,
    replication_dlq: HashMap<String, Vec<Task>>,
}

/// An [`ExecutionStoreBackend`] backed by `Vec`s guarded by a mutex.
///
/// Never durable across process restarts; only intended for unit tests of components
/// that depend on an [`ExecutionStoreBackend`].
pub struct ExecutionStoreFixture {
    state: Mutex<State>,
}

impl ExecutionStoreFixture {
    pub fn new() -> Self {
        ExecutionStoreFixture {
            state: Mutex::new(State::default()),
        }
    }

    pub async fn seed_transfer(&self, tasks: Vec<Task>) {
        self.state.lock().await.transfer = tasks;
    }

    pub async fn seed_timer(&self, tasks: Vec<Task>) {
        self.state.lock().await.timer = tasks;
    }

    pub async fn seed_replication(&self, cluster: &str, tasks: Vec<Task>) {
        self.state
            .lock()
            .await
            .replication
            .insert(cluster.to_string(), tasks);
    }
}

impl Default for ExecutionStoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ExecutionStoreBackend for ExecutionStoreFixture {
    async fn get_transfer_tasks(
        &self,
        _: &Context,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        _: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let state = self.state.lock().await;
        let tasks: Vec<Task> = state
            .transfer
            .iter()
            .filter(|t| t.task_id > read_level && t.task_id <= max_read_level)
            .take(batch_size as usize)
            .cloned()
            .collect();
        Ok(TaskPage {
            tasks,
            next_page_token: None,
        })
    }

    async fn complete_transfer_task(&self, _: &Context, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.transfer.retain(|t| t.task_id != id);
        Ok(())
    }

    async fn range_complete_transfer_task(&self, _: &Context, exclusive_begin: i64, inclusive_end: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .transfer
            .retain(|t| !(t.task_id > exclusive_begin && t.task_id <= inclusive_end));
        Ok(())
    }

    async fn get_timer_index_tasks(
        &self,
        _: &Context,
        min_ts_ms: i64,
        max_ts_ms: i64,
        batch_size: u32,
        _: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .timer
            .iter()
            .filter(|t| t.visibility_timestamp_ms >= min_ts_ms && t.visibility_timestamp_ms <= max_ts_ms)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.visibility_timestamp_ms, t.task_id));
        tasks.truncate(batch_size as usize);
        Ok(TaskPage {
            tasks,
            next_page_token: None,
        })
    }

    async fn complete_timer_task(&self, _: &Context, visibility_ms: i64, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .timer
            .retain(|t| !(t.visibility_timestamp_ms == visibility_ms && t.task_id == id));
        Ok(())
    }

    async fn range_complete_timer_task(&self, _: &Context, min_ts_ms: i64, max_ts_ms: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .timer
            .retain(|t| !(t.visibility_timestamp_ms >= min_ts_ms && t.visibility_timestamp_ms <= max_ts_ms));
        Ok(())
    }

    async fn get_replication_tasks(
        &self,
        _: &Context,
        cluster: &str,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        _: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let state = self.state.lock().await;
        let tasks: Vec<Task> = state
            .replication
            .get(cluster)
            .into_iter()
            .flatten()
            .filter(|t| t.task_id > read_level && t.task_id <= max_read_level)
            .take(batch_size as usize)
            .cloned()
            .collect();
        Ok(TaskPage {
            tasks,
            next_page_token: None,
        })
    }

    async fn range_complete_replication_task(&self, _: &Context, cluster: &str, inclusive_end: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(tasks) = state.replication.get_mut(cluster) {
            tasks.retain(|t| t.task_id > inclusive_end);
        }
        Ok(())
    }

    async fn put_replication_task_to_dlq(&self, _: &Context, cluster: &str, task: Task) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .replication_dlq
            .entry(cluster.to_string())
            .or_default()
            .push(task);
        Ok(())
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        _: &Context,
        cluster: &str,
        from_exclusive: i64,
        batch_size: u32,
        _: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let state = self.state.lock().await;
        let tasks: Vec<Task> = state
            .replication_dlq
            .get(cluster)
            .into_iter()
            .flatten()
            .filter(|t| t.task_id > from_exclusive)
            .take(batch_size as usize)
            .cloned()
            .collect();
        Ok(TaskPage {
            tasks,
            next_page_token: None,
        })
    }

    async fn range_delete_replication_task_from_dlq(&self, _: &Context, cluster: &str, inclusive_end: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(tasks) = state.replication_dlq.get_mut(cluster) {
            tasks.retain(|t| t.task_id > inclusive_end);
        }
        Ok(())
    }

    async fn get_replication_dlq_size(&self, _: &Context, cluster: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .replication_dlq
            .get(cluster)
            .map(|tasks| tasks.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionStoreFixture;
    use crate::execution_store::ExecutionStoreBackend;
    use crate::model::Task;
    use crate::model::TaskCategory;
    use crate::model::WorkflowRef;

    fn task(id: i64) -> Task {
        Task {
            task_id: id,
            category: TaskCategory::Transfer,
            visibility_timestamp_ms: 0,
            workflow: WorkflowRef {
                domain_id: "d".into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn transfer_read_and_complete() {
        let context = queuecore_context::Context::fixture();
        let store = ExecutionStoreFixture::new();
        store.seed_transfer(vec![task(1), task(2), task(3)]).await;

        let page = store
            .get_transfer_tasks(&context, 0, 10, 10, None)
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 3);

        store.complete_transfer_task(&context, 2).await.unwrap();
        let page = store
            .get_transfer_tasks(&context, 0, 10, 10, None)
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 2);
    }

    #[tokio::test]
    async fn replication_dlq_round_trip() {
        let context = queuecore_context::Context::fixture();
        let store = ExecutionStoreFixture::new();

        store
            .put_replication_task_to_dlq(&context, "peer-a", task(42))
            .await
            .unwrap();
        assert_eq!(
            store.get_replication_dlq_size(&context, "peer-a").await.unwrap(),
            1
        );

        let page = store
            .get_replication_tasks_from_dlq(&context, "peer-a", -1, 10, None)
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 1);

        store
            .range_delete_replication_task_from_dlq(&context, "peer-a", 42)
            .await
            .unwrap();
        assert_eq!(
            store.get_replication_dlq_size(&context, "peer-a").await.unwrap(),
            0
        );
    }
}
