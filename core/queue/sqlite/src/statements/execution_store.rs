//! SQLite implementation of [`ExecutionStoreBackend`].
use anyhow::Result;

use queuecore_context::Context;
use queuecore_queue::execution_store::ExecutionStoreBackend;
use queuecore_queue::execution_store::TaskPage;
use queuecore_queue::model::Task;
use queuecore_queue::model::TaskCategory;
use queuecore_queue::model::WorkflowRef;

use super::SqliteExecutionStore;

const GET_TRANSFER_SQL: &str = "
SELECT task_id, domain_id, workflow_id, run_id, payload FROM tasks_transfer
WHERE shard = ?1 AND task_id > ?2 AND task_id <= ?3
ORDER BY task_id ASC
LIMIT ?4;";
const COMPLETE_TRANSFER_SQL: &str = "DELETE FROM tasks_transfer WHERE shard = ?1 AND task_id = ?2;";
const RANGE_COMPLETE_TRANSFER_SQL: &str =
    "DELETE FROM tasks_transfer WHERE shard = ?1 AND task_id > ?2 AND task_id <= ?3;";

const GET_TIMER_SQL: &str = "
SELECT task_id, visibility_ms, domain_id, workflow_id, run_id, payload FROM tasks_timer
WHERE shard = ?1 AND visibility_ms >= ?2 AND visibility_ms <= ?3
ORDER BY visibility_ms ASC, task_id ASC
LIMIT ?4;";
const COMPLETE_TIMER_SQL: &str =
    "DELETE FROM tasks_timer WHERE shard = ?1 AND visibility_ms = ?2 AND task_id = ?3;";
const RANGE_COMPLETE_TIMER_SQL: &str =
    "DELETE FROM tasks_timer WHERE shard = ?1 AND visibility_ms >= ?2 AND visibility_ms <= ?3;";

const GET_REPLICATION_SQL: &str = "
SELECT task_id, domain_id, workflow_id, run_id, payload FROM tasks_replication
WHERE cluster = ?1 AND task_id > ?2 AND task_id <= ?3
ORDER BY task_id ASC
LIMIT ?4;";
const RANGE_COMPLETE_REPLICATION_SQL: &str =
    "DELETE FROM tasks_replication WHERE cluster = ?1 AND task_id <= ?2;";
const INSERT_REPLICATION_DLQ_SQL: &str = "
INSERT INTO tasks_replication_dlq (cluster, task_id, domain_id, workflow_id, run_id, payload)
VALUES (?1, ?2, ?3, ?4, ?5, ?6);";
const GET_REPLICATION_DLQ_SQL: &str = "
SELECT task_id, domain_id, workflow_id, run_id, payload FROM tasks_replication_dlq
WHERE cluster = ?1 AND task_id > ?2
ORDER BY task_id ASC
LIMIT ?3;";
const RANGE_DELETE_REPLICATION_DLQ_SQL: &str =
    "DELETE FROM tasks_replication_dlq WHERE cluster = ?1 AND task_id <= ?2;";
const REPLICATION_DLQ_SIZE_SQL: &str =
    "SELECT COUNT(*) FROM tasks_replication_dlq WHERE cluster = ?1;";

fn workflow_task(
    category: TaskCategory,
    task_id: i64,
    visibility_timestamp_ms: i64,
    domain_id: String,
    workflow_id: String,
    run_id: String,
    payload: String,
) -> Result<Task> {
    Ok(Task {
        task_id,
        category,
        visibility_timestamp_ms,
        workflow: WorkflowRef {
            domain_id,
            workflow_id,
            run_id,
        },
        payload: serde_json::from_str(&payload)?,
    })
}

fn page_token_from_last(tasks: &[Task], batch_size: u32) -> Option<Vec<u8>> {
    if tasks.len() < batch_size as usize {
        return None;
    }
    tasks.last().map(|task| task.task_id.to_le_bytes().to_vec())
}

#[async_trait::async_trait]
impl ExecutionStoreBackend for SqliteExecutionStore {
    async fn get_transfer_tasks(
        &self,
        _: &Context,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let lower_bound = match page_token {
            Some(bytes) => i64::from_le_bytes(bytes.try_into().unwrap_or_default()),
            None => read_level,
        };
        let shard = self.shard.clone();
        let rows: Vec<(i64, String, String, String, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(GET_TRANSFER_SQL)?;
                let rows = statement
                    .query_map(
                        rusqlite::params![shard, lower_bound, max_read_level, batch_size],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        let tasks = rows
            .into_iter()
            .map(|(task_id, domain_id, workflow_id, run_id, payload)| {
                workflow_task(TaskCategory::Transfer, task_id, 0, domain_id, workflow_id, run_id, payload)
            })
            .collect::<Result<Vec<_>>>()?;
        let next_page_token = page_token_from_last(&tasks, batch_size);
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    async fn complete_transfer_task(&self, _: &Context, id: i64) -> Result<()> {
        let shard = self.shard.clone();
        self.connection
            .call(move |connection| {
                connection.execute(COMPLETE_TRANSFER_SQL, rusqlite::params![shard, id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn range_complete_transfer_task(
        &self,
        _: &Context,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<()> {
        let shard = self.shard.clone();
        self.connection
            .call(move |connection| {
                connection.execute(
                    RANGE_COMPLETE_TRANSFER_SQL,
                    rusqlite::params![shard, exclusive_begin, inclusive_end],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_timer_index_tasks(
        &self,
        _: &Context,
        min_ts_ms: i64,
        max_ts_ms: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let lower_bound = match page_token {
            Some(bytes) => i64::from_le_bytes(bytes.try_into().unwrap_or_default()),
            None => min_ts_ms,
        };
        let shard = self.shard.clone();
        let rows: Vec<(i64, i64, String, String, String, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(GET_TIMER_SQL)?;
                let rows = statement
                    .query_map(
                        rusqlite::params![shard, lower_bound, max_ts_ms, batch_size],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                            ))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        let tasks = rows
            .into_iter()
            .map(|(task_id, visibility_ms, domain_id, workflow_id, run_id, payload)| {
                workflow_task(
                    TaskCategory::Timer,
                    task_id,
                    visibility_ms,
                    domain_id,
                    workflow_id,
                    run_id,
                    payload,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let next_page_token = tasks
            .last()
            .filter(|_| tasks.len() == batch_size as usize)
            .map(|task| task.visibility_timestamp_ms.to_le_bytes().to_vec());
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    async fn complete_timer_task(&self, _: &Context, visibility_ms: i64, id: i64) -> Result<()> {
        let shard = self.shard.clone();
        self.connection
            .call(move |connection| {
                connection.execute(COMPLETE_TIMER_SQL, rusqlite::params![shard, visibility_ms, id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn range_complete_timer_task(&self, _: &Context, min_ts_ms: i64, max_ts_ms: i64) -> Result<()> {
        let shard = self.shard.clone();
        self.connection
            .call(move |connection| {
                connection.execute(
                    RANGE_COMPLETE_TIMER_SQL,
                    rusqlite::params![shard, min_ts_ms, max_ts_ms],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_replication_tasks(
        &self,
        _: &Context,
        cluster: &str,
        read_level: i64,
        max_read_level: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let lower_bound = match page_token {
            Some(bytes) => i64::from_le_bytes(bytes.try_into().unwrap_or_default()),
            None => read_level,
        };
        let cluster = cluster.to_string();
        let rows: Vec<(i64, String, String, String, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(GET_REPLICATION_SQL)?;
                let rows = statement
                    .query_map(
                        rusqlite::params![cluster, lower_bound, max_read_level, batch_size],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        let tasks = rows
            .into_iter()
            .map(|(task_id, domain_id, workflow_id, run_id, payload)| {
                workflow_task(TaskCategory::Replication, task_id, 0, domain_id, workflow_id, run_id, payload)
            })
            .collect::<Result<Vec<_>>>()?;
        let next_page_token = page_token_from_last(&tasks, batch_size);
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    async fn range_complete_replication_task(
        &self,
        _: &Context,
        cluster: &str,
        inclusive_end: i64,
    ) -> Result<()> {
        let cluster = cluster.to_string();
        self.connection
            .call(move |connection| {
                connection.execute(
                    RANGE_COMPLETE_REPLICATION_SQL,
                    rusqlite::params![cluster, inclusive_end],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn put_replication_task_to_dlq(&self, _: &Context, cluster: &str, task: Task) -> Result<()> {
        let cluster = cluster.to_string();
        let payload = serde_json::to_string(&task.payload)?;
        self.connection
            .call(move |connection| {
                connection.execute(
                    INSERT_REPLICATION_DLQ_SQL,
                    rusqlite::params![
                        cluster,
                        task.task_id,
                        task.workflow.domain_id,
                        task.workflow.workflow_id,
                        task.workflow.run_id,
                        payload,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        _: &Context,
        cluster: &str,
        from_exclusive: i64,
        batch_size: u32,
        page_token: Option<Vec<u8>>,
    ) -> Result<TaskPage> {
        let lower_bound = match page_token {
            Some(bytes) => i64::from_le_bytes(bytes.try_into().unwrap_or_default()),
            None => from_exclusive,
        };
        let cluster = cluster.to_string();
        let rows: Vec<(i64, String, String, String, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(GET_REPLICATION_DLQ_SQL)?;
                let rows = statement
                    .query_map(rusqlite::params![cluster, lower_bound, batch_size], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        let tasks = rows
            .into_iter()
            .map(|(task_id, domain_id, workflow_id, run_id, payload)| {
                workflow_task(TaskCategory::Replication, task_id, 0, domain_id, workflow_id, run_id, payload)
            })
            .collect::<Result<Vec<_>>>()?;
        let next_page_token = page_token_from_last(&tasks, batch_size);
        Ok(TaskPage {
            tasks,
            next_page_token,
        })
    }

    async fn range_delete_replication_task_from_dlq(
        &self,
        _: &Context,
        cluster: &str,
        inclusive_end: i64,
    ) -> Result<()> {
        let cluster = cluster.to_string();
        self.connection
            .call(move |connection| {
                connection.execute(
                    RANGE_DELETE_REPLICATION_DLQ_SQL,
                    rusqlite::params![cluster, inclusive_end],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_replication_dlq_size(&self, _: &Context, cluster: &str) -> Result<u64> {
        let cluster = cluster.to_string();
        let size: i64 = self
            .connection
            .call(move |connection| {
                connection.query_row(REPLICATION_DLQ_SIZE_SQL, rusqlite::params![cluster], |row| {
                    row.get(0)
                })
            })
            .await?;
        Ok(size as u64)
    }
}

#[cfg(test)]
mod tests {
    use queuecore_queue::execution_store::ExecutionStoreBackend;

    use super::SqliteExecutionStore;

    async fn backend() -> SqliteExecutionStore {
        let connection = crate::statements::tests::sqlite_connection().await;
        SqliteExecutionStore::new(connection, "shard-0")
    }

    async fn insert_transfer_task(connection: &tokio_rusqlite::Connection, task_id: i64) {
        connection
            .call(move |connection| {
                connection.execute(
                    "INSERT INTO tasks_transfer (shard, task_id, domain_id, workflow_id, run_id, payload)
                     VALUES ('shard-0', ?1, 'd', 'w', 'r', 'null');",
                    rusqlite::params![task_id],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_transfer_tasks_respects_read_range() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        for id in 0..5 {
            insert_transfer_task(&backend.connection, id).await;
        }
        let page = backend
            .get_transfer_tasks(&context, -1, 100, 10, None)
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 5);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn complete_transfer_task_removes_row() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        insert_transfer_task(&backend.connection, 1).await;
        backend.complete_transfer_task(&context, 1).await.unwrap();
        let page = backend
            .get_transfer_tasks(&context, -1, 100, 10, None)
            .await
            .unwrap();
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn get_transfer_tasks_paginates_with_batch_size() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        for id in 0..3 {
            insert_transfer_task(&backend.connection, id).await;
        }
        let page = backend
            .get_transfer_tasks(&context, -1, 100, 2, None)
            .await
            .unwrap();
        assert_eq!(page.tasks.len(), 2);
        assert!(page.next_page_token.is_some());
    }
}
