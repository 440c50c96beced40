//! Shard-scoped, persisted task queues: storage, read-range tracking and ack bookkeeping.
//!
//! A queue here is split into two halves, mirroring how the rest of this codebase separates
//! concerns:
//!
//! - The [`persisted_queue`] log: an ordered, append-only message stream with per-consumer
//!   ack levels, used directly by replication's domain queues.
//! - The [`processing_queue`]/[`ack_manager`] pair: the logical read-range tracking used by
//!   the transfer and timer queue processors (in `queuecore-shard`) to split, merge and poll.
pub mod ack_manager;
pub mod error;
pub mod execution_store;
pub mod factory;
pub mod model;
pub mod persisted_queue;
pub mod processing_queue;
pub mod rate_limiter;
pub mod redispatcher;
pub mod shard;
pub mod timer_gate;

pub mod telemetry;
pub use self::telemetry::register_metrics;
