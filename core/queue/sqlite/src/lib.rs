//! SQLite backend for [`queuecore_queue::persisted_queue`], [`queuecore_queue::execution_store`]
//! and [`queuecore_queue::shard::ShardContext`].
mod conf;
mod factory;
mod schema;
mod statements;
mod telemetry;

pub use self::conf::Conf;
pub use self::conf::ConfError;
pub use self::factory::SqliteFactory;
pub use self::factory::MEMORY_PATH;
pub use self::statements::SqliteExecutionStore;
pub use self::statements::SqlitePersistedQueue;
pub use self::statements::SqliteShardContext;
