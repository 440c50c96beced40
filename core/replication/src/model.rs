//! Wire types exchanged with peer clusters over the replication admin RPC.
use serde::Deserialize;
use serde::Serialize;

/// Category tag carried by a replication task, matching `TaskCategory` on the source side.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ReplicationTaskType {
    Invalid = 0,
    Transfer = 1,
    Timer = 2,
    Replication = 3,
}

/// Request token identifying a shard's replication read position on a peer cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReplicationToken {
    pub shard_id: i64,
    pub last_retrieved_id: i64,
    pub last_processed_id: i64,
}

/// A single replication task as delivered by a peer cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationTask {
    /// ID this task was assigned on the source cluster.
    pub source_task_id: i64,

    pub task_type: ReplicationTaskType,

    pub created_at_ms: i64,

    /// Category-specific attributes, opaque to the fetcher and processor.
    pub attributes: serde_json::Value,
}

/// Response to a `ReplicationToken` request: a batch of tasks plus the new read position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationMessageBatch {
    pub tasks: Vec<ReplicationTask>,
    pub last_retrieved_id: i64,
}

/// Small descriptor persisted in the local DLQ; the full payload stays at the source until
/// [`crate::dlq::DLQHandler::merge_messages`] re-fetches and applies it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    pub cluster: String,
    pub shard_id: i64,
    pub source_task_id: i64,
    pub task_type: ReplicationTaskType,
}

/// Status forwarded from the sync-shard loop to the local engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncShardStatus {
    pub cluster: String,
    pub shard_id: i64,
    pub last_processed_id: i64,
    pub observed_at_ms: i64,
}
