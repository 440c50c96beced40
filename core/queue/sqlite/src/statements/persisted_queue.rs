//! SQLite implementation of [`PersistedQueueBackend`].
use std::collections::HashMap;

use anyhow::Result;
use opentelemetry_api::trace::FutureExt;
use rusqlite::OptionalExtension;

use replisdk::utils::metrics::CountFutureErrExt;
use replisdk::utils::trace::TraceFutureStdErrExt;

use queuecore_context::Context;
use queuecore_queue::persisted_queue::PersistedQueueBackend;
use queuecore_queue::persisted_queue::QueueMessage;
use queuecore_queue::persisted_queue::NO_MESSAGE;

use super::SqlitePersistedQueue;

const NEXT_MESSAGE_ID_SQL: &str =
    "SELECT COALESCE(MAX(message_id), -1) + 1 FROM queue_messages WHERE queue = ?1;";
const INSERT_MESSAGE_SQL: &str =
    "INSERT INTO queue_messages (queue, message_id, payload) VALUES (?1, ?2, ?3);";
const READ_MESSAGES_SQL: &str = "
SELECT message_id, payload FROM queue_messages
WHERE queue = ?1 AND message_id > ?2
ORDER BY message_id ASC
LIMIT ?3;";
const DELETE_MESSAGES_BEFORE_SQL: &str =
    "DELETE FROM queue_messages WHERE queue = ?1 AND message_id <= ?2;";
const UPSERT_ACK_LEVEL_SQL: &str = "
INSERT INTO queue_ack_levels (queue, consumer, message_id) VALUES (?1, ?2, ?3)
ON CONFLICT (queue, consumer) DO UPDATE SET message_id = excluded.message_id
WHERE excluded.message_id > queue_ack_levels.message_id;";
const ACK_LEVELS_SQL: &str =
    "SELECT consumer, message_id FROM queue_ack_levels WHERE queue = ?1;";

const NEXT_DLQ_MESSAGE_ID_SQL: &str =
    "SELECT COALESCE(MAX(message_id), -1) + 1 FROM queue_dlq_messages WHERE queue = ?1;";
const INSERT_DLQ_MESSAGE_SQL: &str =
    "INSERT INTO queue_dlq_messages (queue, message_id, payload) VALUES (?1, ?2, ?3);";
const READ_DLQ_MESSAGES_SQL: &str = "
SELECT message_id, payload FROM queue_dlq_messages
WHERE queue = ?1 AND message_id > ?2
ORDER BY message_id ASC
LIMIT ?3;";
const RANGE_DELETE_DLQ_SQL: &str =
    "DELETE FROM queue_dlq_messages WHERE queue = ?1 AND message_id <= ?2;";
const UPSERT_DLQ_ACK_LEVEL_SQL: &str = "
INSERT INTO queue_dlq_ack_levels (queue, consumer, message_id) VALUES (?1, ?2, ?3)
ON CONFLICT (queue, consumer) DO UPDATE SET message_id = excluded.message_id
WHERE excluded.message_id > queue_dlq_ack_levels.message_id;";
const DLQ_ACK_LEVEL_SQL: &str =
    "SELECT message_id FROM queue_dlq_ack_levels WHERE queue = ?1 AND consumer = ?2;";
const SIZE_SQL: &str = "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1;";

fn rows_to_messages(rows: Vec<(i64, String)>) -> Result<Vec<QueueMessage>> {
    rows.into_iter()
        .map(|(message_id, payload)| {
            Ok(QueueMessage {
                message_id,
                payload: serde_json::from_str(&payload)?,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl PersistedQueueBackend for SqlitePersistedQueue {
    async fn enqueue(&self, _: &Context, payload: serde_json::Value) -> Result<i64> {
        let (err_count, _timer) = crate::telemetry::observe_op("queue.enqueue");
        let trace = crate::telemetry::trace_op("queue.enqueue");
        let queue = self.queue.clone();
        let payload = serde_json::to_string(&payload)?;
        self.connection
            .call(move |connection| {
                let tx = connection.transaction()?;
                let message_id: i64 =
                    tx.query_row(NEXT_MESSAGE_ID_SQL, rusqlite::params![queue], |row| row.get(0))?;
                tx.execute(
                    INSERT_MESSAGE_SQL,
                    rusqlite::params![queue, message_id, payload],
                )?;
                tx.commit()?;
                Ok(message_id)
            })
            .count_on_err(err_count)
            .trace_on_err_with_status()
            .with_context(trace)
            .await
            .map_err(anyhow::Error::from)
    }

    async fn read(
        &self,
        _: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        let (err_count, _timer) = crate::telemetry::observe_op("queue.read");
        let queue = self.queue.clone();
        let rows: Vec<(i64, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(READ_MESSAGES_SQL)?;
                let rows = statement
                    .query_map(rusqlite::params![queue, from_exclusive, max], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .count_on_err(err_count)
            .await?;
        rows_to_messages(rows)
    }

    async fn update_ack_level(&self, _: &Context, consumer: &str, message_id: i64) -> Result<()> {
        let (err_count, _timer) = crate::telemetry::observe_op("queue.update_ack_level");
        let queue = self.queue.clone();
        let consumer = consumer.to_string();
        self.connection
            .call(move |connection| {
                connection.execute(
                    UPSERT_ACK_LEVEL_SQL,
                    rusqlite::params![queue, consumer, message_id],
                )?;
                Ok(())
            })
            .count_on_err(err_count)
            .await?;
        Ok(())
    }

    async fn ack_levels(&self, _: &Context) -> Result<HashMap<String, i64>> {
        let queue = self.queue.clone();
        let rows = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(ACK_LEVELS_SQL)?;
                let rows = statement
                    .query_map(rusqlite::params![queue], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn delete_before(&self, _: &Context, id: i64) -> Result<()> {
        let queue = self.queue.clone();
        self.connection
            .call(move |connection| {
                connection.execute(DELETE_MESSAGES_BEFORE_SQL, rusqlite::params![queue, id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn enqueue_dlq(&self, _: &Context, payload: serde_json::Value) -> Result<i64> {
        let queue = self.queue.clone();
        let payload = serde_json::to_string(&payload)?;
        self.connection
            .call(move |connection| {
                let tx = connection.transaction()?;
                let message_id: i64 = tx.query_row(
                    NEXT_DLQ_MESSAGE_ID_SQL,
                    rusqlite::params![queue],
                    |row| row.get(0),
                )?;
                tx.execute(
                    INSERT_DLQ_MESSAGE_SQL,
                    rusqlite::params![queue, message_id, payload],
                )?;
                tx.commit()?;
                Ok(message_id)
            })
            .await
            .map_err(anyhow::Error::from)
    }

    async fn read_dlq(
        &self,
        _: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        let queue = self.queue.clone();
        let rows: Vec<(i64, String)> = self
            .connection
            .call(move |connection| {
                let mut statement = connection.prepare_cached(READ_DLQ_MESSAGES_SQL)?;
                let rows = statement
                    .query_map(rusqlite::params![queue, from_exclusive, max], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows_to_messages(rows)
    }

    async fn range_delete_dlq(&self, _: &Context, id: i64) -> Result<()> {
        let queue = self.queue.clone();
        self.connection
            .call(move |connection| {
                connection.execute(RANGE_DELETE_DLQ_SQL, rusqlite::params![queue, id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn update_dlq_ack_level(
        &self,
        _: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()> {
        let queue = self.queue.clone();
        let consumer = consumer.to_string();
        self.connection
            .call(move |connection| {
                connection.execute(
                    UPSERT_DLQ_ACK_LEVEL_SQL,
                    rusqlite::params![queue, consumer, message_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn dlq_ack_level(&self, _: &Context, consumer: &str) -> Result<i64> {
        let queue = self.queue.clone();
        let consumer = consumer.to_string();
        let level: Option<i64> = self
            .connection
            .call(move |connection| {
                let level = connection
                    .query_row(
                        DLQ_ACK_LEVEL_SQL,
                        rusqlite::params![queue, consumer],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(level)
            })
            .await?;
        Ok(level.unwrap_or(NO_MESSAGE))
    }

    async fn size(&self, _: &Context) -> Result<u64> {
        let queue = self.queue.clone();
        let size: i64 = self
            .connection
            .call(move |connection| {
                connection.query_row(SIZE_SQL, rusqlite::params![queue], |row| row.get(0))
            })
            .await?;
        Ok(size as u64)
    }
}

#[cfg(test)]
mod tests {
    use queuecore_queue::persisted_queue::PersistedQueueBackend;
    use queuecore_queue::persisted_queue::NO_MESSAGE;

    use super::SqlitePersistedQueue;

    async fn backend() -> SqlitePersistedQueue {
        let connection = crate::statements::tests::sqlite_connection().await;
        SqlitePersistedQueue::new(connection, "unit-test")
    }

    #[tokio::test]
    async fn enqueue_assigns_increasing_ids() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        let first = backend
            .enqueue(&context, serde_json::json!(1))
            .await
            .unwrap();
        let second = backend
            .enqueue(&context, serde_json::json!(2))
            .await
            .unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn ack_level_does_not_regress() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        backend.update_ack_level(&context, "c1", 5).await.unwrap();
        backend.update_ack_level(&context, "c1", 2).await.unwrap();
        let levels = backend.ack_levels(&context).await.unwrap();
        assert_eq!(levels.get("c1"), Some(&5));
    }

    #[tokio::test]
    async fn dlq_ack_level_defaults_to_no_message() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        let level = backend.dlq_ack_level(&context, "missing").await.unwrap();
        assert_eq!(level, NO_MESSAGE);
    }

    #[tokio::test]
    async fn read_respects_from_exclusive_and_max() {
        let context = queuecore_context::Context::fixture();
        let backend = backend().await;
        for value in 0..5 {
            backend
                .enqueue(&context, serde_json::json!(value))
                .await
                .unwrap();
        }
        let page = backend.read(&context, 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message_id, 2);
        assert_eq!(page[1].message_id, 3);
    }
}
