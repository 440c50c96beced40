//! In-memory [`PersistedQueueBackend`] for unit tests.
use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use queuecore_context::Context;

use super::PersistedQueueBackend;
use super::QueueMessage;
use super::NO_MESSAGE;

#[derive(Default)]
struct State {
    messages: Vec<QueueMessage>,
    ack_levels: HashMap<String, i64>,
    dlq: Vec<QueueMessage>,
    dlq_ack_levels: HashMap<String, i64>,
}

/// A [`PersistedQueueBackend`] backed by a `Vec` guarded by a mutex.
///
/// Never durable across process restarts; only intended for unit tests of components
/// that depend on a [`PersistedQueue`](super::PersistedQueue).
pub struct PersistedQueueFixture {
    state: Mutex<State>,
}

impl PersistedQueueFixture {
    pub fn new() -> Self {
        PersistedQueueFixture {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for PersistedQueueFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn next_id(messages: &[QueueMessage]) -> i64 {
    messages.last().map(|m| m.message_id).unwrap_or(NO_MESSAGE) + 1
}

fn read_from(messages: &[QueueMessage], from_exclusive: i64, max: u32) -> Vec<QueueMessage> {
    messages
        .iter()
        .filter(|m| m.message_id > from_exclusive)
        .take(max as usize)
        .cloned()
        .collect()
}

#[async_trait::async_trait]
impl PersistedQueueBackend for PersistedQueueFixture {
    async fn enqueue(&self, _: &Context, payload: serde_json::Value) -> Result<i64> {
        let mut state = self.state.lock().await;
        let message_id = next_id(&state.messages);
        state.messages.push(QueueMessage {
            message_id,
            payload,
        });
        Ok(message_id)
    }

    async fn read(
        &self,
        _: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        let state = self.state.lock().await;
        Ok(read_from(&state.messages, from_exclusive, max))
    }

    async fn update_ack_level(&self, _: &Context, consumer: &str, message_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.ack_levels.get(consumer).copied().unwrap_or(NO_MESSAGE);
        if message_id > current {
            state.ack_levels.insert(consumer.to_string(), message_id);
        }
        Ok(())
    }

    async fn ack_levels(&self, _: &Context) -> Result<HashMap<String, i64>> {
        let state = self.state.lock().await;
        Ok(state.ack_levels.clone())
    }

    async fn delete_before(&self, _: &Context, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.messages.retain(|m| m.message_id > id);
        Ok(())
    }

    async fn enqueue_dlq(&self, _: &Context, payload: serde_json::Value) -> Result<i64> {
        let mut state = self.state.lock().await;
        let message_id = next_id(&state.dlq);
        state.dlq.push(QueueMessage {
            message_id,
            payload,
        });
        Ok(message_id)
    }

    async fn read_dlq(
        &self,
        _: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        let state = self.state.lock().await;
        Ok(read_from(&state.dlq, from_exclusive, max))
    }

    async fn range_delete_dlq(&self, _: &Context, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.dlq.retain(|m| m.message_id > id);
        Ok(())
    }

    async fn update_dlq_ack_level(
        &self,
        _: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state
            .dlq_ack_levels
            .get(consumer)
            .copied()
            .unwrap_or(NO_MESSAGE);
        if message_id > current {
            state.dlq_ack_levels.insert(consumer.to_string(), message_id);
        }
        Ok(())
    }

    async fn dlq_ack_level(&self, _: &Context, consumer: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .dlq_ack_levels
            .get(consumer)
            .copied()
            .unwrap_or(NO_MESSAGE))
    }

    async fn size(&self, _: &Context) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.messages.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::PersistedQueueFixture;
    use crate::persisted_queue::PersistedQueue;

    #[tokio::test]
    async fn enqueue_read_ack_purge() {
        let context = queuecore_context::Context::fixture();
        let queue = PersistedQueue::new("unit-test", PersistedQueueFixture::new());

        for value in 0..4 {
            let id = queue.enqueue(&context, &value).await.unwrap();
            assert_eq!(id, value);
        }

        let messages = queue.read(&context, -1, 10).await.unwrap();
        assert_eq!(messages.len(), 4);

        queue
            .update_ack_level(&context, "c1", 2)
            .await
            .unwrap();
        let levels = queue.ack_levels(&context).await.unwrap();
        assert_eq!(levels.get("c1"), Some(&2));

        // Acking a lower level must not regress the stored value.
        queue.update_ack_level(&context, "c1", 1).await.unwrap();
        let levels = queue.ack_levels(&context).await.unwrap();
        assert_eq!(levels.get("c1"), Some(&2));

        queue.delete_before(&context, 2).await.unwrap();
        let messages = queue.read(&context, -1, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, 3);
    }

    #[tokio::test]
    async fn dlq_is_independent_of_primary() {
        let context = queuecore_context::Context::fixture();
        let queue = PersistedQueue::new("unit-test", PersistedQueueFixture::new());

        queue.enqueue(&context, &1).await.unwrap();
        queue.enqueue_dlq(&context, &"dead").await.unwrap();

        let primary = queue.read(&context, -1, 10).await.unwrap();
        let dlq = queue.read_dlq(&context, -1, 10).await.unwrap();
        assert_eq!(primary.len(), 1);
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].decode::<String>().unwrap(), "dead");
    }
}
