//! Initialise the SQLite queue and execution store backends.
use std::sync::Arc;

use anyhow::Context as AnyContext;
use anyhow::Result;
use serde_json::Value as Json;
use tokio_rusqlite::Connection;

use queuecore_context::Context;
use queuecore_queue::factory::PersistedQueueFactory;
use queuecore_queue::factory::PersistedQueueFactoryArgs;
use queuecore_queue::factory::PersistedQueueFactorySyncArgs;
use queuecore_queue::persisted_queue::PersistedQueue;

use queuecore_queue::shard::TimeSource;

use crate::statements::SqliteExecutionStore;
use crate::statements::SqlitePersistedQueue;
use crate::statements::SqliteShardContext;
use crate::Conf;
use crate::ConfError;

/// Special path requesting the use of an in-memory queue store.
pub const MEMORY_PATH: &str = ":memory:";

/// Initialise the SQLite backend for persisted queues and the execution store.
pub struct SqliteFactory;

impl SqliteFactory {
    /// Initialise a [`SqliteExecutionStore`] for the given shard.
    ///
    /// The execution store has no equivalent to [`PersistedQueueFactory`] (it is consumed
    /// directly by `queuecore-shard`/`queuecore-replication` rather than looked up by a
    /// logical queue name), so this is a plain inherent method rather than a trait member.
    pub async fn execution_store(
        &self,
        context: &Context,
        conf: &Json,
        shard: impl Into<String>,
    ) -> Result<SqliteExecutionStore> {
        let conf: Conf = serde_json::from_value(conf.clone())?;
        let connection = create_client(context, &conf).await?;
        Ok(SqliteExecutionStore::new(connection, shard))
    }

    /// Initialise a [`SqliteShardContext`] for the given shard.
    pub async fn shard_context(
        &self,
        context: &Context,
        conf: &Json,
        shard: impl Into<String>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<SqliteShardContext> {
        let conf: Conf = serde_json::from_value(conf.clone())?;
        let connection = create_client(context, &conf).await?;
        Ok(SqliteShardContext::new(connection, shard, time_source))
    }
}

#[async_trait::async_trait]
impl PersistedQueueFactory for SqliteFactory {
    fn conf_check(&self, _: &Context, conf: &Json) -> Result<()> {
        serde_json::from_value::<Conf>(conf.clone()).context(ConfError)?;
        Ok(())
    }

    fn register_metrics(&self, registry: &prometheus::Registry) -> Result<()> {
        crate::telemetry::register_metrics(registry)?;
        Ok(())
    }

    async fn queue<'a>(&self, args: PersistedQueueFactoryArgs<'a>) -> Result<PersistedQueue> {
        let conf: Conf = serde_json::from_value(args.conf.clone())?;
        let connection = create_client(args.context, &conf).await?;
        let backend = SqlitePersistedQueue::new(connection, args.name);
        Ok(PersistedQueue::new(args.name, backend))
    }

    async fn sync<'a>(&self, args: PersistedQueueFactorySyncArgs<'a>) -> Result<()> {
        let conf: Conf = serde_json::from_value(args.conf.clone())?;
        let connection = create_client(args.context, &conf).await?;
        connection
            .call(move |connection| {
                crate::schema::create(connection)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Create a SQLite DB [`Connection`] to store and retrieve queue rows.
///
/// The special [`MEMORY_PATH`] constant can be specified to create an in-memory store, used
/// only for tests and experimentation: all data is lost when the process terminates.
pub(crate) async fn create_client(context: &Context, conf: &Conf) -> Result<Connection> {
    let path = &conf.path;
    let connection = if path == MEMORY_PATH {
        slog::warn!(
            context.logger,
            "Using in-memory store means data will be lost once the process terminates"
        );
        Connection::open_in_memory().await
    } else {
        Connection::open(path).await
    };
    Ok(connection?)
}
