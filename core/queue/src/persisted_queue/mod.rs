//! A PersistedQueue is an ordered, monotonically-numbered message log with per-consumer
//! ack levels and a DLQ sibling. See the crate level docs for the operations it exposes.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use replisdk::utils::metrics::CountFutureErrExt;

use queuecore_context::Context;

#[cfg(any(test, feature = "test-fixture"))]
mod fixture;
#[cfg(any(test, feature = "test-fixture"))]
pub use self::fixture::PersistedQueueFixture;

/// Sentinel ack level meaning "no messages have been acked yet".
pub const NO_MESSAGE: i64 = -1;

/// A single row read back from a persisted queue.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct QueueMessage {
    /// Monotonically assigned ID of this message within the queue.
    pub message_id: i64,

    /// Opaque payload, serialised by the caller.
    pub payload: serde_json::Value,
}

impl QueueMessage {
    /// Decode the payload into a structured value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::from_value(self.payload.clone())?;
        Ok(value)
    }
}

/// Submit a persisted-queue facade that attaches telemetry to every backend call.
///
/// Cheap to clone: internally an [`Arc`] over the selected backend implementation.
#[derive(Clone)]
pub struct PersistedQueue {
    inner: Arc<dyn PersistedQueueBackend>,
    name: &'static str,
}

impl PersistedQueue {
    /// Wrap a backend implementation behind the telemetry-instrumented facade.
    pub fn new<B>(name: &'static str, backend: B) -> Self
    where
        B: PersistedQueueBackend + 'static,
    {
        PersistedQueue {
            inner: Arc::new(backend),
            name,
        }
    }

    /// Serialise `payload` and append it to the queue, returning the assigned message ID.
    pub async fn enqueue<P: Serialize>(&self, context: &Context, payload: &P) -> Result<i64> {
        let payload = serde_json::to_value(payload)?;
        let err_count = crate::telemetry::ENQUEUE_ERR.with_label_values(&[self.name]);
        crate::telemetry::ENQUEUE_COUNT
            .with_label_values(&[self.name])
            .inc();
        self.inner
            .enqueue(context, payload)
            .count_on_err(err_count)
            .await
    }

    /// Read up to `max` messages with `message_id > from_exclusive`, ordered ascending.
    pub async fn read(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        self.inner.read(context, from_exclusive, max).await
    }

    /// Upsert the ack level for `consumer`. Ignored if lower than the stored value.
    pub async fn update_ack_level(
        &self,
        context: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()> {
        self.inner
            .update_ack_level(context, consumer, message_id)
            .await?;
        crate::telemetry::observe_ack_level(self.name, consumer, message_id);
        Ok(())
    }

    /// Fetch the ack level for every known consumer.
    pub async fn ack_levels(&self, context: &Context) -> Result<HashMap<String, i64>> {
        self.inner.ack_levels(context).await
    }

    /// Delete every message with `message_id <= id`.
    ///
    /// Callers must ensure `id` does not exceed the minimum ack level across consumers.
    pub async fn delete_before(&self, context: &Context, id: i64) -> Result<()> {
        self.inner.delete_before(context, id).await
    }

    /// Append a message to the DLQ sibling queue.
    pub async fn enqueue_dlq<P: Serialize>(&self, context: &Context, payload: &P) -> Result<i64> {
        let payload = serde_json::to_value(payload)?;
        self.inner.enqueue_dlq(context, payload).await
    }

    /// Read up to `max` messages from the DLQ with `message_id > from_exclusive`.
    pub async fn read_dlq(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>> {
        self.inner.read_dlq(context, from_exclusive, max).await
    }

    /// Delete every DLQ message with `message_id <= id`.
    pub async fn range_delete_dlq(&self, context: &Context, id: i64) -> Result<()> {
        self.inner.range_delete_dlq(context, id).await
    }

    /// Upsert the DLQ ack level for `consumer`.
    pub async fn update_dlq_ack_level(
        &self,
        context: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()> {
        self.inner
            .update_dlq_ack_level(context, consumer, message_id)
            .await
    }

    /// Fetch the DLQ ack level for `consumer`, defaulting to [`NO_MESSAGE`].
    pub async fn dlq_ack_level(&self, context: &Context, consumer: &str) -> Result<i64> {
        self.inner.dlq_ack_level(context, consumer).await
    }

    /// Number of messages currently retained by the primary queue.
    pub async fn size(&self, context: &Context) -> Result<u64> {
        self.inner.size(context).await
    }

    /// Initialise an in-memory fixture for unit tests.
    #[cfg(feature = "test-fixture")]
    pub fn fixture(name: &'static str) -> Self {
        PersistedQueue::new(name, PersistedQueueFixture::new())
    }
}

/// Operations a persistence technology must implement to back a [`PersistedQueue`].
#[async_trait::async_trait]
pub trait PersistedQueueBackend: Send + Sync {
    async fn enqueue(&self, context: &Context, payload: serde_json::Value) -> Result<i64>;
    async fn read(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>>;
    async fn update_ack_level(
        &self,
        context: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()>;
    async fn ack_levels(&self, context: &Context) -> Result<HashMap<String, i64>>;
    async fn delete_before(&self, context: &Context, id: i64) -> Result<()>;

    async fn enqueue_dlq(&self, context: &Context, payload: serde_json::Value) -> Result<i64>;
    async fn read_dlq(
        &self,
        context: &Context,
        from_exclusive: i64,
        max: u32,
    ) -> Result<Vec<QueueMessage>>;
    async fn range_delete_dlq(&self, context: &Context, id: i64) -> Result<()>;
    async fn update_dlq_ack_level(
        &self,
        context: &Context,
        consumer: &str,
        message_id: i64,
    ) -> Result<()>;
    async fn dlq_ack_level(&self, context: &Context, consumer: &str) -> Result<i64>;

    async fn size(&self, context: &Context) -> Result<u64>;
}
