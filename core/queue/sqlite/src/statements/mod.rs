//! SQL statements implementing [`PersistedQueueBackend`], [`ExecutionStoreBackend`] and
//! [`ShardContext`] with SQLite.
use std::sync::Arc;

use tokio_rusqlite::Connection;

use queuecore_queue::shard::TimeSource;

mod execution_store;
mod persisted_queue;
mod shard;

/// [`PersistedQueueBackend`](queuecore_queue::persisted_queue::PersistedQueueBackend)
/// implementation scoped to a single logical queue name.
#[derive(Clone)]
pub struct SqlitePersistedQueue {
    connection: Connection,
    queue: String,
}

impl SqlitePersistedQueue {
    pub fn new(connection: Connection, queue: impl Into<String>) -> Self {
        SqlitePersistedQueue {
            connection,
            queue: queue.into(),
        }
    }
}

/// [`ExecutionStoreBackend`](queuecore_queue::execution_store::ExecutionStoreBackend)
/// implementation scoped to a single shard.
#[derive(Clone)]
pub struct SqliteExecutionStore {
    connection: Connection,
    shard: String,
}

impl SqliteExecutionStore {
    pub fn new(connection: Connection, shard: impl Into<String>) -> Self {
        SqliteExecutionStore {
            connection,
            shard: shard.into(),
        }
    }
}

/// [`ShardContext`](queuecore_queue::shard::ShardContext) implementation backed by a
/// dedicated `shard_state` key/value table.
#[derive(Clone)]
pub struct SqliteShardContext {
    connection: Connection,
    shard: String,
    time_source: Arc<dyn TimeSource>,
}

impl SqliteShardContext {
    pub fn new(connection: Connection, shard: impl Into<String>, time_source: Arc<dyn TimeSource>) -> Self {
        SqliteShardContext {
            connection,
            shard: shard.into(),
            time_source,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tokio_rusqlite::Connection;

    pub async fn sqlite_connection() -> Connection {
        let connection = Connection::open_in_memory().await.unwrap();
        connection
            .call(|connection| {
                crate::schema::create(connection).unwrap();
                Ok(())
            })
            .await
            .unwrap();
        connection
    }
}
