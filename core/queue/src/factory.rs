//! Initialise a [`PersistedQueue`] backend from the configured `BackendConf`.
use anyhow::Result;
use serde_json::Value as Json;

use queuecore_context::Context;

use crate::persisted_queue::PersistedQueue;

/// Initialisation logic for a persistence technology backing the task queues.
///
/// Implemented once per supported backend (e.g. the SQLite backend in `queuecore-queue-sqlite`)
/// and selected at runtime via the configured `BackendConf::backend` name.
#[async_trait::async_trait]
pub trait PersistedQueueFactory: Send + Sync {
    /// Validate the user provided configuration for the backend.
    fn conf_check(&self, context: &Context, conf: &Json) -> Result<()>;

    /// Register backend specific metrics.
    fn register_metrics(&self, registry: &prometheus::Registry) -> Result<()>;

    /// Initialise a [`PersistedQueue`] client for the named logical queue.
    async fn queue<'a>(&self, args: PersistedQueueFactoryArgs<'a>) -> Result<PersistedQueue>;

    /// Synchronise (create or migrate) the backing store's schema.
    async fn sync<'a>(&self, args: PersistedQueueFactorySyncArgs<'a>) -> Result<()>;
}

/// Arguments passed to [`PersistedQueueFactory::queue`].
pub struct PersistedQueueFactoryArgs<'a> {
    /// The configuration block for the backend to initialise.
    pub conf: &'a Json,

    /// Container for operation scoped values.
    pub context: &'a Context,

    /// Logical name of the queue being initialised, used as the telemetry label.
    pub name: &'static str,
}

/// Arguments passed to [`PersistedQueueFactory::sync`].
pub struct PersistedQueueFactorySyncArgs<'a> {
    /// The configuration block for the backend to synchronise.
    pub conf: &'a Json,

    /// Container for operation scoped values.
    pub context: &'a Context,

    /// Every logical queue name the process expects the backend to support.
    pub names: &'a [&'static str],
}
