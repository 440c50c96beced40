//! SQLite implementation of [`ShardContext`].
use std::sync::Arc;

use anyhow::Result;
use rusqlite::OptionalExtension;

use queuecore_context::Context;
use queuecore_queue::shard::ShardContext;
use queuecore_queue::shard::TimeSource;

use super::SqliteShardContext;

const UPSERT_SQL: &str = "
INSERT INTO shard_state (shard, key, value) VALUES (?1, ?2, ?3)
ON CONFLICT (shard, key) DO UPDATE SET value = excluded.value;";
const GET_SQL: &str = "SELECT value FROM shard_state WHERE shard = ?1 AND key = ?2;";

const TRANSFER_ACK_LEVEL_KEY: &str = "transfer_ack_level";
const TIMER_ACK_LEVEL_KEY: &str = "timer_ack_level";

fn replication_level_key(cluster: &str) -> String {
    format!("replication_level:{cluster}")
}

fn replicator_dlq_ack_level_key(cluster: &str) -> String {
    format!("replicator_dlq_ack_level:{cluster}")
}

impl SqliteShardContext {
    async fn get(&self, key: String) -> Result<i64> {
        let shard = self.shard.clone();
        let value = self
            .connection
            .call(move |connection| {
                let value = connection
                    .query_row(GET_SQL, rusqlite::params![shard, key], |row| row.get(0))
                    .optional()?;
                Ok(value.unwrap_or(-1i64))
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: String, value: i64) -> Result<()> {
        let shard = self.shard.clone();
        self.connection
            .call(move |connection| {
                connection.execute(UPSERT_SQL, rusqlite::params![shard, key, value])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ShardContext for SqliteShardContext {
    fn shard_id(&self) -> &str {
        &self.shard
    }

    async fn update_transfer_ack_level(&self, _: &Context, level: i64) -> Result<()> {
        self.set(TRANSFER_ACK_LEVEL_KEY.to_string(), level).await
    }

    async fn get_transfer_ack_level(&self, _: &Context) -> Result<i64> {
        self.get(TRANSFER_ACK_LEVEL_KEY.to_string()).await
    }

    async fn update_timer_ack_level(&self, _: &Context, visibility_ms: i64) -> Result<()> {
        self.set(TIMER_ACK_LEVEL_KEY.to_string(), visibility_ms).await
    }

    async fn get_timer_ack_level(&self, _: &Context) -> Result<i64> {
        self.get(TIMER_ACK_LEVEL_KEY.to_string()).await
    }

    async fn update_cluster_replication_level(
        &self,
        _: &Context,
        cluster: &str,
        id: i64,
    ) -> Result<()> {
        self.set(replication_level_key(cluster), id).await
    }

    async fn get_cluster_replication_level(&self, _: &Context, cluster: &str) -> Result<i64> {
        self.get(replication_level_key(cluster)).await
    }

    async fn update_replicator_dlq_ack_level(
        &self,
        _: &Context,
        cluster: &str,
        id: i64,
    ) -> Result<()> {
        self.set(replicator_dlq_ack_level_key(cluster), id).await
    }

    fn time_source(&self) -> Arc<dyn TimeSource> {
        self.time_source.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use queuecore_queue::shard::ShardContext;
    use queuecore_queue::shard::SystemTimeSource;

    use super::super::SqliteShardContext;
    use crate::statements::tests::sqlite_connection;

    #[tokio::test]
    async fn ack_levels_persist_and_default_to_none() {
        let context = queuecore_context::Context::fixture();
        let connection = sqlite_connection().await;
        let shard = SqliteShardContext::new(connection, "shard-0", Arc::new(SystemTimeSource));

        assert_eq!(
            shard.get_cluster_replication_level(&context, "peer-a").await.unwrap(),
            -1
        );

        shard
            .update_cluster_replication_level(&context, "peer-a", 42)
            .await
            .unwrap();
        assert_eq!(
            shard.get_cluster_replication_level(&context, "peer-a").await.unwrap(),
            42
        );

        // A second cluster's level is tracked independently.
        assert_eq!(
            shard.get_cluster_replication_level(&context, "peer-b").await.unwrap(),
            -1
        );
    }

    #[tokio::test]
    async fn transfer_and_timer_ack_levels_round_trip() {
        let context = queuecore_context::Context::fixture();
        let connection = sqlite_connection().await;
        let shard = SqliteShardContext::new(connection, "shard-0", Arc::new(SystemTimeSource));

        assert_eq!(shard.get_transfer_ack_level(&context).await.unwrap(), -1);
        assert_eq!(shard.get_timer_ack_level(&context).await.unwrap(), -1);

        shard.update_transfer_ack_level(&context, 7).await.unwrap();
        shard.update_timer_ack_level(&context, 123).await.unwrap();

        assert_eq!(shard.get_transfer_ack_level(&context).await.unwrap(), 7);
        assert_eq!(shard.get_timer_ack_level(&context).await.unwrap(), 123);
    }
}
