//! Queue of domain-metadata replication messages, shared by every peer cluster.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;

use queuecore_context::Context;
use queuecore_queue::persisted_queue::PersistedQueue;

use crate::model::ReplicationTask;

/// How often the purge processor checks for a deferred ack before sweeping.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// A [`PersistedQueue`] of domain-metadata messages, with a background purge processor.
///
/// Unlike a per-cluster replication feed, this queue has no single owning cluster: every
/// peer consumes it and acks independently, so messages are only safe to delete once every
/// known consumer has acked past them.
pub struct DomainReplicationQueue {
    queue: PersistedQueue,
    ack_signalled: AtomicBool,
}

impl DomainReplicationQueue {
    pub fn new(queue: PersistedQueue) -> Self {
        DomainReplicationQueue {
            queue,
            ack_signalled: AtomicBool::new(false),
        }
    }

    /// Encode and enqueue a domain-metadata message.
    pub async fn publish(&self, context: &Context, task: &ReplicationTask) -> Result<i64> {
        self.queue.enqueue(context, task).await
    }

    /// Encode and enqueue a domain-metadata message to the DLQ.
    pub async fn publish_to_dlq(&self, context: &Context, task: &ReplicationTask) -> Result<i64> {
        self.queue.enqueue_dlq(context, task).await
    }

    /// Read and decode up to `max` messages with `message_id > from_exclusive`.
    pub async fn get_replication_messages(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<ReplicationTask>> {
        let messages = self.queue.read(context, from_exclusive, max).await?;
        messages.iter().map(|message| message.decode()).collect()
    }

    /// Read and decode up to `max` DLQ messages.
    ///
    /// Each task's `source_task_id` is overwritten with its local DLQ message ID, so
    /// consumers address it in the local DLQ namespace rather than whatever ID it carried
    /// on the cluster it was originally replicated from.
    pub async fn get_messages_from_dlq(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<ReplicationTask>> {
        let messages = self.queue.read_dlq(context, from_exclusive, max).await?;
        messages
            .into_iter()
            .map(|message| {
                let mut task: ReplicationTask = message.decode()?;
                task.source_task_id = message.message_id;
                Ok(task)
            })
            .collect()
    }

    /// Upsert `consumer`'s ack level and flag the purge processor to sweep on its next tick.
    pub async fn ack(&self, context: &Context, consumer: &str, message_id: i64) -> Result<()> {
        self.queue.update_ack_level(context, consumer, message_id).await?;
        self.ack_signalled.store(true, Ordering::Release);
        Ok(())
    }

    /// Run the purge processor until `exit` resolves.
    ///
    /// Every tick, if an ack was signalled since the previous one, compute the minimum
    /// ack level across all known consumers and delete every message at or below it.
    pub async fn run(&self, context: Context, exit: impl std::future::Future<Output = ()>) -> Result<()> {
        tokio::pin!(exit);
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);

        loop {
            tokio::select! {
                _ = &mut exit => break,
                _ = ticker.tick() => {
                    if self.ack_signalled.swap(false, Ordering::AcqRel) {
                        if let Err(error) = self.purge(&context).await {
                            slog::warn!(
                                context.logger, "Domain replication queue purge sweep failed";
                                replisdk::utils::error::slog::ErrorAttributes::from(&error),
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn purge(&self, context: &Context) -> Result<()> {
        let levels = self.queue.ack_levels(context).await?;
        let min_ack = match levels.values().copied().min() {
            Some(level) => level,
            None => return Ok(()),
        };
        crate::telemetry::observe_domain_queue_ack_level(min_ack);
        self.queue.delete_before(context, min_ack).await
    }
}

#[cfg(test)]
mod tests {
    use super::DomainReplicationQueue;
    use crate::model::ReplicationTask;
    use crate::model::ReplicationTaskType;

    fn task(id: i64) -> ReplicationTask {
        ReplicationTask {
            source_task_id: id,
            task_type: ReplicationTaskType::Replication,
            created_at_ms: 0,
            attributes: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn publish_and_read_round_trip() {
        let context = queuecore_context::Context::fixture();
        let queue = DomainReplicationQueue::new(queuecore_queue::persisted_queue::PersistedQueue::fixture("domain"));

        queue.publish(&context, &task(1)).await.unwrap();
        queue.publish(&context, &task(2)).await.unwrap();

        let messages = queue.get_replication_messages(&context, -1, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].source_task_id, 1);
    }

    #[tokio::test]
    async fn dlq_read_overwrites_source_task_id_with_local_message_id() {
        let context = queuecore_context::Context::fixture();
        let queue = DomainReplicationQueue::new(queuecore_queue::persisted_queue::PersistedQueue::fixture("domain"));

        queue.publish_to_dlq(&context, &task(99)).await.unwrap();
        let messages = queue.get_messages_from_dlq(&context, -1, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source_task_id, 0);
    }

    #[tokio::test]
    async fn purge_deletes_up_to_minimum_ack() {
        let context = queuecore_context::Context::fixture();
        let queue = DomainReplicationQueue::new(queuecore_queue::persisted_queue::PersistedQueue::fixture("domain"));

        for id in 1..=3 {
            queue.publish(&context, &task(id)).await.unwrap();
        }
        queue.ack(&context, "peer-a", 3).await.unwrap();
        queue.ack(&context, "peer-b", 1).await.unwrap();

        queue.purge(&context).await.unwrap();

        let messages = queue.get_replication_messages(&context, -1, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source_task_id, 3);
    }
}
