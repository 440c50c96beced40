//! Admin RPC surface consumed from peer clusters.
//!
//! The wire transport (gRPC/HTTP) is left to a backend crate this repository does not
//! provide, the same way `queuecore-queue::factory::PersistedQueueFactory` leaves the wire
//! protocol of the persistence backend to its implementor.
use anyhow::Result;

use queuecore_context::Context;

use crate::model::ReplicationMessageBatch;
use crate::model::ReplicationTask;
use crate::model::ReplicationToken;
use crate::model::TaskInfo;

/// Operations a peer cluster's admin surface must expose to this process.
#[async_trait::async_trait]
pub trait PeerAdminClient: Send + Sync {
    /// Fetch the next batch of replication messages for each of the given tokens.
    ///
    /// The returned vector is aligned with `tokens` by position.
    async fn get_replication_messages(
        &self,
        context: &Context,
        cluster: &str,
        tokens: &[ReplicationToken],
    ) -> Result<Vec<ReplicationMessageBatch>>;

    /// Re-fetch the full payload of DLQ'd tasks, identified by their source descriptors.
    async fn get_dlq_replication_messages(
        &self,
        context: &Context,
        cluster: &str,
        infos: &[TaskInfo],
    ) -> Result<Vec<ReplicationTask>>;
}

#[cfg(any(test, feature = "test-fixture"))]
mod fixture;
#[cfg(any(test, feature = "test-fixture"))]
pub use self::fixture::PeerAdminClientFixture;
