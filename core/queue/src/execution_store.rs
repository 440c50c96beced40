//! Backend trait for reading and completing transfer, timer and replication tasks.
use anyhow::Result;

use queuecore_context::Context;

use crate::model::Task;

#[cfg(any(test, feature = "test-fixture"))]
mod fixture;
#[cfg(any(test, feature = "test-fixture"))]
pub use self::fixture::ExecutionStoreFixture;

/// A page of tasks plus an opaque continuation token for the next read.
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_page_token: Option<Vec<u8>>,
}

/// Persistence operations over the transfer, timer and replication task lists.
///
/// One implementation backs all three categories: the teacher's sibling store and tasks
/// backends are merged here because every category shares the same read/complete shape,
/// differing only in key ordering (task ID vs. `(visibility_timestamp, task_id)`).
#[async_trait::async_trait]
pub trait ExecutionStoreBackend: Send + Sync {
    async fn get_transfer_tasks(
        &self,
        context: &Context,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage>;
    async fn complete_transfer_task(&self, context: &Context, id: i64) -> Result<()>;
    async fn range_complete_transfer_task(
        &self,
        context: &Context,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<()>;

    async fn get_timer_index_tasks(
        &self,
        context: &Context,
        min_ts_ms: i64,
        max_ts_ms: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage>;
    async fn complete_timer_task(&self, context: &Context, visibility_ms: i64, id: i64) -> Result<()>;
    async fn range_complete_timer_task(&self, context: &Context, min_ts_ms: i64, max_ts_ms: i64) -> Result<()>;

    async fn get_replication_tasks(
        &self,
        context: &Context,
        cluster: &str,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage>;
    async fn range_complete_replication_task(
        &self,
        context: &Context,
        cluster: &str,
        inclusive_end: i64,
    ) -> Result<()>;
    async fn put_replication_task_to_dlq(&self, context: &Context, cluster: &str, task: Task) -> Result<()>;
    async fn get_replication_tasks_from_dlq(
        &self,
        context: &Context,
        cluster: &str,
        from_exclusive: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage>;
    async fn range_delete_replication_task_from_dlq(
        &self,
        context: &Context,
        cluster: &str,
        inclusive_end: i64,
    ) -> Result<()>;
    async fn get_replication_dlq_size(&self, context: &Context, cluster: &str) -> Result<u64>;
}
