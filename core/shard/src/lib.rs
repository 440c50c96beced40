//! Transfer and timer queue processors owned by a shard.
//!
//! Each processor polls its task list, dispatches tasks to a worker pool, tracks completions
//! via an ack manager and periodically splits/merges its processing queues. See
//! [`transfer::TransferQueueProcessor`] and [`timer::TimerQueueProcessor`].
mod backoff;
pub mod timer;
pub mod transfer;
pub mod worker;

/// Lifecycle state of a queue processor. Single-writer per shard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessorState {
    Initialized,
    Started,
    Stopped,
}

pub use self::timer::TimerQueueProcessor;
pub use self::transfer::TransferQueueProcessor;
pub use self::worker::TaskWorker;
