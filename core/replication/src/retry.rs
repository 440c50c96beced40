//! Two-phase per-task retry policy used while applying replication tasks.
use std::time::Duration;

use queuecore_conf::ReplicationConf;

enum Phase {
    /// Fixed-wait retries, up to `error_retry_max_attempts`.
    First,
    /// Growing-wait retries, bounded by `error_second_retry_max_wait_ms`, for up to
    /// `error_second_retry_expiration_sec` total elapsed time.
    Second,
}

/// Tracks how long a single replication task has been retried and what to do next.
///
/// `BadRequest` errors and `ServiceBusy` (peer backpressure) are not tracked by this
/// policy: callers check the error kind before consulting it, per the retry-exception
/// list in the replication task processor's design.
pub struct TaskRetryPolicy {
    phase: Phase,
    attempts: u16,
    delay: Duration,
    started_at_ms: i64,
    error_retry_max_attempts: u16,
    error_retry_wait: Duration,
    error_second_retry_wait: Duration,
    error_second_retry_max_wait: Duration,
    error_second_retry_expiration_ms: i64,
}

/// Outcome of consulting the policy after a failed apply attempt.
pub enum RetryOutcome {
    /// Wait this long, then retry.
    Wait(Duration),
    /// The retry budget is exhausted; send the task to the DLQ.
    Exhausted,
}

impl TaskRetryPolicy {
    pub fn new(conf: &ReplicationConf, now_ms: i64) -> Self {
        TaskRetryPolicy {
            phase: Phase::First,
            attempts: 0,
            delay: Duration::from_millis(conf.error_retry_wait_ms),
            started_at_ms: now_ms,
            error_retry_max_attempts: conf.error_retry_max_attempts,
            error_retry_wait: Duration::from_millis(conf.error_retry_wait_ms),
            error_second_retry_wait: Duration::from_millis(conf.error_second_retry_wait_ms),
            error_second_retry_max_wait: Duration::from_millis(conf.error_second_retry_max_wait_ms),
            error_second_retry_expiration_ms: (conf.error_second_retry_expiration_sec * 1000)
                as i64,
        }
    }

    /// Record a failed apply attempt and decide whether/how long to wait before retrying.
    pub fn fail(&mut self, now_ms: i64) -> RetryOutcome {
        match self.phase {
            Phase::First => {
                self.attempts += 1;
                if self.attempts <= self.error_retry_max_attempts {
                    return RetryOutcome::Wait(self.error_retry_wait);
                }
                self.phase = Phase::Second;
                self.delay = self.error_second_retry_wait;
                RetryOutcome::Wait(self.delay)
            }
            Phase::Second => {
                let elapsed_ms = now_ms.saturating_sub(self.started_at_ms);
                if elapsed_ms >= self.error_second_retry_expiration_ms {
                    return RetryOutcome::Exhausted;
                }
                let wait = self.delay;
                self.delay = std::cmp::min(self.delay * 2, self.error_second_retry_max_wait);
                RetryOutcome::Wait(wait)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetryOutcome;
    use super::TaskRetryPolicy;
    use queuecore_conf::ReplicationConf;

    fn conf() -> ReplicationConf {
        ReplicationConf {
            error_retry_wait_ms: 10,
            error_retry_max_attempts: 2,
            error_second_retry_wait_ms: 100,
            error_second_retry_max_wait_ms: 400,
            error_second_retry_expiration_sec: 1,
            ..Default::default()
        }
    }

    #[test]
    fn phase_one_then_phase_two_then_exhausted() {
        let mut policy = TaskRetryPolicy::new(&conf(), 0);
        assert!(matches!(policy.fail(0), RetryOutcome::Wait(_)));
        assert!(matches!(policy.fail(0), RetryOutcome::Wait(_)));
        // Phase one budget (2 attempts) spent; now in phase two.
        match policy.fail(100) {
            RetryOutcome::Wait(d) => assert_eq!(d.as_millis(), 100),
            RetryOutcome::Exhausted => panic!("expected a phase-two wait"),
        }
        match policy.fail(200) {
            RetryOutcome::Wait(d) => assert_eq!(d.as_millis(), 200),
            RetryOutcome::Exhausted => panic!("expected growing phase-two wait"),
        }
        assert!(matches!(policy.fail(2_000), RetryOutcome::Exhausted));
    }
}
