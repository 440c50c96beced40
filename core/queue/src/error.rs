//! Per-task errors used by the worker pool and redispatcher.

/// Task encountered a permanent error and will not be retried.
#[derive(Debug, thiserror::Error)]
#[error("task encountered a permanent error and will not be retried")]
pub struct AbandonTask;

/// The redispatch buffer rejected a task because it is already at capacity.
#[derive(Debug, thiserror::Error)]
#[error("redispatch buffer is full")]
pub struct RedispatchFull;

/// Exceeded the maximum number of retries configured for this processor.
#[derive(Debug, thiserror::Error)]
#[error("exceeded maximum of {0} retries")]
pub struct RetriesExceeded(u16);

impl RetriesExceeded {
    pub fn new(max: u16) -> RetriesExceeded {
        RetriesExceeded(max)
    }
}

/// A processing queue collection was asked to split/merge past its configured nesting depth.
#[derive(Debug, thiserror::Error)]
#[error("processing queue split would exceed maximum nesting level {0}")]
pub struct SplitMaxLevelExceeded(pub u32);
