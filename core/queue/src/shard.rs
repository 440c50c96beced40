//! Shard-scoped services a task processor depends on: ack-level persistence and the clock.
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Result;

use queuecore_context::Context;

/// Current time as milliseconds since the Unix epoch, abstracted behind a trait so tests
/// can inject a fake clock instead of racing the real one (the `TimerGate`/poll-interval
/// tests below follow the same "trait + fixture" shape used throughout this codebase).
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// [`TimeSource`] backed by [`SystemTime::now`].
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_millis() as i64
    }
}

/// Services a shard provides to its transfer, timer and replication task processors.
///
/// A processor holds an `Arc<dyn ShardContext>`; the shard itself owns the processing
/// queues, redispatcher and rate limiter instances that reference it.
#[async_trait::async_trait]
pub trait ShardContext: Send + Sync {
    fn shard_id(&self) -> &str;

    /// Persist the advanced transfer-queue ack level for this shard.
    async fn update_transfer_ack_level(&self, context: &Context, level: i64) -> Result<()>;

    /// Last persisted transfer-queue ack level, or `-1` if the shard has never acked one.
    async fn get_transfer_ack_level(&self, context: &Context) -> Result<i64>;

    /// Persist the advanced timer-queue ack level for this shard.
    async fn update_timer_ack_level(&self, context: &Context, visibility_ms: i64) -> Result<()>;

    /// Last persisted timer-queue ack level, or `-1` if the shard has never acked one.
    async fn get_timer_ack_level(&self, context: &Context) -> Result<i64>;

    /// Persist the advanced replication level acked to a peer cluster.
    async fn update_cluster_replication_level(
        &self,
        context: &Context,
        cluster: &str,
        id: i64,
    ) -> Result<()>;

    /// Last replication level acked to a peer cluster.
    async fn get_cluster_replication_level(&self, context: &Context, cluster: &str) -> Result<i64>;

    /// Persist the advanced DLQ ack level for replication tasks pulled from a peer cluster.
    async fn update_replicator_dlq_ack_level(
        &self,
        context: &Context,
        cluster: &str,
        id: i64,
    ) -> Result<()>;

    /// The clock processors should use instead of calling `SystemTime::now` directly.
    fn time_source(&self) -> Arc<dyn TimeSource>;
}

#[cfg(test)]
mod tests {
    use super::SystemTimeSource;
    use super::TimeSource;

    #[test]
    fn system_time_source_is_monotonic_enough_for_ordering() {
        let source = SystemTimeSource;
        let first = source.now_ms();
        let second = source.now_ms();
        assert!(second >= first);
    }
}
