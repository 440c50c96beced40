//! Cross-cluster replication: fetch, apply, retry, DLQ and the shared domain metadata queue.
//!
//! [`fetcher::ReplicationTaskFetcher`] and [`processor::ReplicationProcessor`] pull tasks from
//! one peer cluster and apply them in order, under [`retry::TaskRetryPolicy`]'s two-phase
//! backoff, falling back to [`dlq::DLQHandler`]'s dead-letter queue on exhaustion.
//! [`domain_queue::DomainReplicationQueue`] is the separate, multi-consumer queue used for
//! domain (rather than per-cluster workflow) metadata.
pub mod dlq;
pub mod domain_queue;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod peer;
pub mod processor;
pub mod retry;
pub mod telemetry;

pub use self::dlq::DLQHandler;
pub use self::domain_queue::DomainReplicationQueue;
pub use self::fetcher::ReplicationTaskFetcher;
pub use self::peer::PeerAdminClient;
pub use self::processor::ReplicationProcessor;
pub use self::processor::ReplicationTaskApplier;
pub use self::telemetry::register_metrics;
