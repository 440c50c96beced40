//! Schema for the SQLite queue backend.
//!
//! No migration framework is used: every statement is an idempotent `CREATE TABLE IF NOT
//! EXISTS`, executed as a single batch by [`create`]. There is no teacher schema asset left
//! in this tree to migrate from (the retrieved pack did not carry the teacher's `.sql` files
//! or its `schema.rs`), so there is nothing for a migration runner to version against.
const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages (
    queue TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (queue, message_id)
);

CREATE TABLE IF NOT EXISTS queue_ack_levels (
    queue TEXT NOT NULL,
    consumer TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    PRIMARY KEY (queue, consumer)
);

CREATE TABLE IF NOT EXISTS queue_dlq_messages (
    queue TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (queue, message_id)
);

CREATE TABLE IF NOT EXISTS queue_dlq_ack_levels (
    queue TEXT NOT NULL,
    consumer TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    PRIMARY KEY (queue, consumer)
);

CREATE TABLE IF NOT EXISTS tasks_transfer (
    shard TEXT NOT NULL,
    task_id INTEGER NOT NULL,
    domain_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (shard, task_id)
);

CREATE TABLE IF NOT EXISTS tasks_timer (
    shard TEXT NOT NULL,
    visibility_ms INTEGER NOT NULL,
    task_id INTEGER NOT NULL,
    domain_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (shard, visibility_ms, task_id)
);

CREATE TABLE IF NOT EXISTS tasks_replication (
    cluster TEXT NOT NULL,
    task_id INTEGER NOT NULL,
    domain_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (cluster, task_id)
);

CREATE TABLE IF NOT EXISTS tasks_replication_dlq (
    cluster TEXT NOT NULL,
    task_id INTEGER NOT NULL,
    domain_id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (cluster, task_id)
);

CREATE TABLE IF NOT EXISTS shard_state (
    shard TEXT NOT NULL,
    key TEXT NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (shard, key)
);
"#;

pub fn create(connection: &rusqlite::Connection) -> rusqlite::Result<()> {
    connection.execute_batch(CREATE_TABLES_SQL)
}
