//! Data types shared by every persisted-queue and processing-queue operation.
use serde::Deserialize;
use serde::Serialize;

/// Category a task belongs to.
///
/// Transfer and Timer tasks are read and executed locally by a shard's processors.
/// Replication tasks are delivered to peer clusters instead of being executed locally.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskCategory {
    Transfer,
    Timer,
    Replication,
}

/// Identity of a workflow execution a task operates on.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

/// A durable task record as read back from the execution store.
///
/// The payload is opaque to the task-queue core: it is decoded only by the task processor's
/// registered handler for the task's category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Monotonically assigned ID, scoped to (shard, category).
    pub task_id: i64,

    /// Category this task belongs to.
    pub category: TaskCategory,

    /// Time at which the task becomes visible to readers (meaningful for Timer tasks).
    pub visibility_timestamp_ms: i64,

    /// Workflow execution this task concerns.
    pub workflow: WorkflowRef,

    /// Opaque, category-specific payload.
    pub payload: serde_json::Value,
}

impl Task {
    /// Sort key used by timer queues: (visibility timestamp, task ID).
    pub fn timer_key(&self) -> (i64, i64) {
        (self.visibility_timestamp_ms, self.task_id)
    }
}

/// An inclusive/exclusive set of domain IDs a processing queue is responsible for.
///
/// `include = true` means the filter matches the listed domains; `include = false` means
/// it matches every domain *except* the listed ones (the "default" queue after splits have
/// carved specific domains out of it).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub domain_ids: Vec<String>,
    pub include: bool,
}

impl DomainFilter {
    /// A filter that matches every domain.
    pub fn all() -> Self {
        DomainFilter {
            domain_ids: Vec::new(),
            include: false,
        }
    }

    /// A filter that matches only the given domain.
    pub fn only<S: Into<String>>(domain_id: S) -> Self {
        DomainFilter {
            domain_ids: vec![domain_id.into()],
            include: true,
        }
    }

    pub fn matches(&self, domain_id: &str) -> bool {
        let listed = self.domain_ids.iter().any(|id| id == domain_id);
        if self.include {
            listed
        } else {
            !listed
        }
    }

    /// Split this filter into (matched, remainder) around the given domain.
    ///
    /// `matched` becomes the child queue's filter; `remainder` replaces this filter on
    /// the parent so coverage of every other domain is preserved (invariant 4 in the
    /// testable properties).
    pub fn split_out(&self, domain_id: &str) -> (DomainFilter, DomainFilter) {
        let matched = DomainFilter::only(domain_id);
        let remainder = if self.include {
            let mut domain_ids = self.domain_ids.clone();
            domain_ids.retain(|id| id != domain_id);
            DomainFilter {
                domain_ids,
                include: true,
            }
        } else {
            let mut domain_ids = self.domain_ids.clone();
            if !domain_ids.iter().any(|id| id == domain_id) {
                domain_ids.push(domain_id.to_string());
            }
            DomainFilter {
                domain_ids,
                include: false,
            }
        };
        (matched, remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::DomainFilter;

    #[test]
    fn all_matches_everything() {
        let filter = DomainFilter::all();
        assert!(filter.matches("a"));
        assert!(filter.matches("b"));
    }

    #[test]
    fn split_out_preserves_coverage() {
        let parent = DomainFilter::all();
        let (child, remainder) = parent.split_out("slow-domain");
        assert!(child.matches("slow-domain"));
        assert!(!remainder.matches("slow-domain"));
        assert!(remainder.matches("other-domain"));
    }

    #[test]
    fn split_out_from_include_filter() {
        let parent = DomainFilter {
            domain_ids: vec!["a".into(), "b".into()],
            include: true,
        };
        let (child, remainder) = parent.split_out("a");
        assert!(child.matches("a"));
        assert!(!child.matches("b"));
        assert!(!remainder.matches("a"));
        assert!(remainder.matches("b"));
    }
}
