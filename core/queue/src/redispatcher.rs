//! Bounded retry buffer for tasks the processor could not submit to the worker pool.
use std::collections::VecDeque;

use crate::model::Task;

/// FIFO buffer of tasks rejected by the worker pool (queue-full) awaiting resubmission.
///
/// A full redispatch buffer is a backpressure signal: the poll loop stops reading new
/// tasks from persistence until [`Redispatcher::redispatch`] drains it back down.
pub struct Redispatcher {
    tasks: VecDeque<Task>,
}

impl Redispatcher {
    pub fn new() -> Self {
        Redispatcher {
            tasks: VecDeque::new(),
        }
    }

    /// Add a task to the back of the buffer. Never blocks or rejects.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.push_back(task);
        crate::telemetry::observe_redispatch_depth(self.tasks.len());
    }

    /// Current number of tasks awaiting resubmission.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drain tasks down to `target_max`, in FIFO order, handing each to `try_submit`.
    ///
    /// A task is removed from the buffer only if `try_submit` accepts it; the first
    /// rejection stops the drain so order is preserved for the next attempt.
    pub fn redispatch<F>(&mut self, target_max: usize, mut try_submit: F)
    where
        F: FnMut(&Task) -> bool,
    {
        while self.tasks.len() > target_max {
            let task = match self.tasks.front() {
                Some(task) => task,
                None => break,
            };
            if try_submit(task) {
                self.tasks.pop_front();
            } else {
                break;
            }
        }
        crate::telemetry::observe_redispatch_depth(self.tasks.len());
    }
}

impl Default for Redispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Redispatcher;
    use crate::model::{Task, TaskCategory, WorkflowRef};

    fn task(id: i64) -> Task {
        Task {
            task_id: id,
            category: TaskCategory::Transfer,
            visibility_timestamp_ms: 0,
            workflow: WorkflowRef {
                domain_id: "d".into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn redispatch_preserves_fifo_order_and_stops_on_rejection() {
        let mut redispatcher = Redispatcher::new();
        for id in 0..5 {
            redispatcher.add_task(task(id));
        }

        let mut accepted = Vec::new();
        redispatcher.redispatch(0, |task| {
            if task.task_id < 3 {
                accepted.push(task.task_id);
                true
            } else {
                false
            }
        });

        assert_eq!(accepted, vec![0, 1, 2]);
        assert_eq!(redispatcher.len(), 2);
    }

    #[test]
    fn redispatch_stops_at_target_max() {
        let mut redispatcher = Redispatcher::new();
        for id in 0..5 {
            redispatcher.add_task(task(id));
        }
        let mut accepted = 0;
        redispatcher.redispatch(2, |_| {
            accepted += 1;
            true
        });
        assert_eq!(accepted, 3);
        assert_eq!(redispatcher.len(), 2);
    }
}
