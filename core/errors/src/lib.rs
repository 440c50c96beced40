//! Error kinds shared by persistence backends, peer clients and processors.
//!
//! Every fallible operation in the task-queue core settles on one of these kinds so that
//! callers can decide, without inspecting backend internals, whether to retry, back off,
//! shut down or surface the failure to an operator.

/// The operation failed because of a storage fault expected to clear up on its own.
///
/// Callers should retry with backoff; repeated occurrences are not by themselves fatal.
#[derive(Debug, thiserror::Error)]
#[error("transient storage error during '{operation}'")]
pub struct TransientStorage {
    pub operation: String,
}

impl TransientStorage {
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// The operation failed because of a storage fault that will not clear up on retry.
///
/// Callers holding a long-lived loop (a poll loop, a processor) should shut down rather
/// than keep hammering the backend.
#[derive(Debug, thiserror::Error)]
#[error("permanent storage error during '{operation}'")]
pub struct PermanentStorage {
    pub operation: String,
}

impl PermanentStorage {
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// A version-fenced write lost the race: another writer holds a newer fence value.
///
/// Shard owners treat this as "ownership lost" and shut the owning processor down.
#[derive(Debug, thiserror::Error)]
#[error("condition failed on shard {shard_id}: expected range id {expected}, found {actual}")]
pub struct ConditionFailed {
    pub shard_id: i64,
    pub expected: i64,
    pub actual: i64,
}

impl ConditionFailed {
    pub fn new(shard_id: i64, expected: i64, actual: i64) -> Self {
        Self {
            shard_id,
            expected,
            actual,
        }
    }
}

/// The remote peer is applying backpressure and asked the caller to slow down.
///
/// Retried with a dedicated policy, distinct from and not counted against the
/// per-task retry budget.
#[derive(Debug, thiserror::Error)]
#[error("peer '{peer}' is busy")]
pub struct ServiceBusy {
    pub peer: String,
}

impl ServiceBusy {
    pub fn new<S: Into<String>>(peer: S) -> Self {
        Self { peer: peer.into() }
    }
}

/// The caller sent a request the backend will never be able to satisfy.
///
/// Never retried; the task is either dropped (if safe) or sent to a dead-letter queue.
#[derive(Debug, thiserror::Error)]
#[error("bad request: {reason}")]
pub struct BadRequest {
    pub reason: String,
}

impl BadRequest {
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The referenced record does not exist.
#[derive(Debug, thiserror::Error)]
#[error("not found: {resource}")]
pub struct NotFound {
    pub resource: String,
}

impl NotFound {
    pub fn new<S: Into<String>>(resource: S) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

/// A replication task could not be applied because the consumer's history is behind.
///
/// Surfaced with enough identifying information for the consumer to re-fetch history
/// starting at `first_event_id`.
#[derive(Debug, thiserror::Error)]
#[error(
    "workflow {domain_id}/{workflow_id}/{run_id} is missing events starting at {first_event_id}"
)]
pub struct RetryTaskHint {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub first_event_id: i64,
}

impl RetryTaskHint {
    pub fn new<D, W, R>(domain_id: D, workflow_id: W, run_id: R, first_event_id: i64) -> Self
    where
        D: Into<String>,
        W: Into<String>,
        R: Into<String>,
    {
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            first_event_id,
        }
    }
}
