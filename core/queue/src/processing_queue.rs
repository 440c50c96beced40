//! Logical read ranges over a shard's task keyspace: creation, split and merge.
use crate::ack_manager::AckManager;
use crate::model::DomainFilter;

/// A `[AckLevel, ReadLevel, MaxLevel)` range with a domain filter and nesting level.
///
/// Tasks with keys in `[AckLevel, ReadLevel)` have been read and are tracked individually
/// by the embedded [`AckManager`]; tasks in `[ReadLevel, MaxLevel)` are unread. A queue at
/// level `L+1` is born by splitting a queue at level `L`.
pub struct ProcessingQueue {
    pub filter: DomainFilter,
    pub level: u32,
    read_level: i64,
    max_level: i64,
    ack: AckManager,
    rate_estimate: RateEstimate,
    stuck_cycles: u32,
}

impl ProcessingQueue {
    /// Build a queue covering `[ack_level, read_level)` already read, up to `max_level`.
    pub fn new(filter: DomainFilter, level: u32, ack_level: i64, read_level: i64, max_level: i64) -> Self {
        ProcessingQueue {
            filter,
            level,
            read_level,
            max_level,
            ack: AckManager::new(ack_level),
            rate_estimate: RateEstimate::new(),
            stuck_cycles: 0,
        }
    }

    /// The default full-range queue created when a shard has no persisted state.
    pub fn full_range(max_level: i64) -> Self {
        ProcessingQueue::new(DomainFilter::all(), 0, -1, -1, max_level)
    }

    pub fn ack_level(&self) -> i64 {
        self.ack.ack_level()
    }

    pub fn read_level(&self) -> i64 {
        self.read_level
    }

    pub fn max_level(&self) -> i64 {
        self.max_level
    }

    pub fn pending_count(&self) -> usize {
        self.ack.pending_count()
    }

    /// Register tasks as submitted and advance the read level past them.
    ///
    /// `last_seen_id` becomes the new read level; pass the queue's current `max_level` when
    /// a poll exhausted every page so the range is fully consumed.
    pub fn record_read(&mut self, submitted_ids: impl IntoIterator<Item = i64>, new_read_level: i64) {
        for id in submitted_ids {
            self.ack.add_task(id);
        }
        self.rate_estimate.observe(self.read_level, new_read_level);
        self.read_level = new_read_level;
    }

    pub fn complete(&mut self, id: i64) {
        self.ack.complete(id);
    }

    /// Advance the ack watermark, returning the new level and whether it moved.
    pub fn update_ack_level(&mut self) -> (i64, bool) {
        let before = self.ack.ack_level();
        let after = self.ack.update_ack_level();
        if after > before {
            self.stuck_cycles = 0;
        } else {
            self.stuck_cycles += 1;
        }
        (after, after > before)
    }

    pub fn stuck_cycles(&self) -> u32 {
        self.stuck_cycles
    }

    /// Estimated tasks read per minute, used to size a look-ahead split's max level.
    pub fn estimated_tasks_per_minute(&self, range_size_bits: u32) -> f64 {
        self.rate_estimate.rate_per_minute(range_size_bits)
    }
}

/// EWMA estimator (coefficient 0.6) of the task rate implied by successive read-level deltas.
///
/// Samples that jump by at least `2^(range_size_bits-1)` are discarded: such a jump indicates
/// a shard range-ID renewal rather than genuine task volume, per the split look-ahead design.
struct RateEstimate {
    ewma: Option<f64>,
}

const EWMA_COEFFICIENT: f64 = 0.6;
const DEFAULT_RANGE_SIZE_BITS: u32 = 32;

impl RateEstimate {
    fn new() -> Self {
        RateEstimate { ewma: None }
    }

    fn observe(&mut self, previous_read_level: i64, new_read_level: i64) {
        if new_read_level <= previous_read_level {
            return;
        }
        let delta = new_read_level - previous_read_level;
        let renewal_threshold = 1i64 << DEFAULT_RANGE_SIZE_BITS.saturating_sub(1);
        if delta >= renewal_threshold {
            self.ewma = None;
            return;
        }
        let delta = delta as f64;
        self.ewma = Some(match self.ewma {
            None => delta,
            Some(prev) => EWMA_COEFFICIENT * delta + (1.0 - EWMA_COEFFICIENT) * prev,
        });
    }

    fn rate_per_minute(&self, _range_size_bits: u32) -> f64 {
        self.ewma.unwrap_or(0.0)
    }
}

/// A proposed split of `queue` carving `domain_id` out into a new child at `queue.level + 1`.
pub struct SplitOutcome {
    pub child_filter: DomainFilter,
    pub parent_filter: DomainFilter,
    pub child_max_level: i64,
}

/// Reasons a split policy decided to act, used only for logging/metrics labels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SplitReason {
    PendingTaskThreshold,
    StuckTask,
    Random,
}

/// Split `domain_id` out of `queue` into its own child, with a look-ahead `max_level` when
/// `look_ahead_duration_ms` is non-zero (used by the stuck-task policy to quarantine a slow
/// domain without blocking peers sharing the same queue).
pub fn split_domain(
    queue: &ProcessingQueue,
    domain_id: &str,
    look_ahead_duration_ms: i64,
    range_size_bits: u32,
) -> SplitOutcome {
    let (child_filter, parent_filter) = queue.filter.split_out(domain_id);
    let child_max_level = if look_ahead_duration_ms > 0 {
        let rate_per_ms = queue.estimated_tasks_per_minute(range_size_bits) / 60_000.0;
        let look_ahead = (rate_per_ms * look_ahead_duration_ms as f64) as i64;
        let upper_bound = 1i64 << range_size_bits;
        (queue.read_level() + look_ahead).clamp(0, upper_bound)
    } else {
        queue.max_level()
    };
    SplitOutcome {
        child_filter,
        parent_filter,
        child_max_level,
    }
}

/// Decide whether `pending_count` for `domain_id` exceeds the configured threshold.
pub fn should_split_pending(pending_count: usize, threshold: usize) -> bool {
    pending_count > threshold
}

/// Decide whether a queue stuck for `stuck_cycles` poll cycles should be split off.
pub fn should_split_stuck(stuck_cycles: u32, threshold: u32) -> bool {
    stuck_cycles >= threshold
}

/// The set of [`ProcessingQueue`]s sharing a single nesting level.
///
/// Queues within a collection have disjoint domain filters. The "active" queue -- the one
/// with the lowest `ReadLevel` -- is polled first so the processor makes progress on the
/// range that has fallen furthest behind.
#[derive(Default)]
pub struct ProcessingQueueCollection {
    queues: Vec<ProcessingQueue>,
}

impl ProcessingQueueCollection {
    pub fn new() -> Self {
        ProcessingQueueCollection { queues: Vec::new() }
    }

    pub fn push(&mut self, queue: ProcessingQueue) {
        self.queues.push(queue);
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessingQueue> {
        self.queues.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProcessingQueue> {
        self.queues.iter_mut()
    }

    /// The queue with the lowest read level, i.e. the one that has fallen furthest behind.
    pub fn active(&self) -> Option<&ProcessingQueue> {
        self.queues.iter().min_by_key(|q| q.read_level())
    }

    pub fn active_mut(&mut self) -> Option<&mut ProcessingQueue> {
        self.queues.iter_mut().min_by_key(|q| q.read_level())
    }

    /// The minimum ack level across every queue in the collection, or `None` when empty.
    pub fn min_ack_level(&self) -> Option<i64> {
        self.queues.iter().map(|q| q.ack_level()).min()
    }

    /// Replace the queue matching `child_filter`'s carved domain with a split child, keeping
    /// the parent filter narrowed in place. Caller supplies the outcome from [`split_domain`].
    pub fn apply_split(&mut self, parent_index: usize, outcome: SplitOutcome, child_read_level: i64) -> ProcessingQueue {
        let parent = &mut self.queues[parent_index];
        parent.filter = outcome.parent_filter;
        ProcessingQueue::new(
            outcome.child_filter,
            parent.level + 1,
            child_read_level - 1,
            child_read_level,
            outcome.child_max_level,
        )
    }

    /// Remove `index` and return it, for merging into a sibling or the parent level.
    pub fn take(&mut self, index: usize) -> ProcessingQueue {
        self.queues.remove(index)
    }
}

/// Whether `child` can be merged into `into`: their look-ahead range must not exceed the
/// target's max level, and the merged filter must stay within the size threshold.
pub fn can_merge(child: &ProcessingQueue, into: &ProcessingQueue, max_merged_domains: usize) -> bool {
    if child.max_level() > into.max_level() {
        return false;
    }
    let merged_domains = child.filter.domain_ids.len() + into.filter.domain_ids.len();
    merged_domains <= max_merged_domains
}

/// Fold `child`'s ack state into `into`'s AckManager and widen `into`'s filter to cover it.
pub fn merge_into(child: ProcessingQueue, into: &mut ProcessingQueue) {
    into.filter.domain_ids.extend(child.filter.domain_ids);
    into.read_level = into.read_level.max(child.read_level);
    into.max_level = into.max_level.max(child.max_level);
    into.ack = AckManager::new(into.ack_level().min(child.ack_level()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DomainFilter;

    #[test]
    fn split_domain_preserves_coverage() {
        let queue = ProcessingQueue::new(DomainFilter::all(), 0, -1, 100, 1000);
        let outcome = split_domain(&queue, "slow", 0, 32);
        assert!(outcome.child_filter.matches("slow"));
        assert!(!outcome.parent_filter.matches("slow"));
        assert!(outcome.parent_filter.matches("other"));
    }

    #[test]
    fn split_with_look_ahead_extends_child_max_level() {
        let mut queue = ProcessingQueue::new(DomainFilter::all(), 0, -1, 100, 1000);
        queue.record_read(0..0, 200);
        queue.record_read(0..0, 260);
        let outcome = split_domain(&queue, "slow", 60_000, 32);
        assert!(outcome.child_max_level >= queue.read_level());
    }

    #[test]
    fn should_split_pending_uses_strict_threshold() {
        assert!(should_split_pending(11, 10));
        assert!(!should_split_pending(10, 10));
    }

    #[test]
    fn active_queue_is_the_one_furthest_behind() {
        let mut collection = ProcessingQueueCollection::new();
        collection.push(ProcessingQueue::new(DomainFilter::all(), 0, -1, 500, 1000));
        collection.push(ProcessingQueue::new(DomainFilter::only("d"), 0, -1, 100, 1000));
        assert_eq!(collection.active().unwrap().read_level(), 100);
    }

    #[test]
    fn min_ack_level_across_collection() {
        let mut collection = ProcessingQueueCollection::new();
        collection.push(ProcessingQueue::new(DomainFilter::all(), 0, 5, 10, 100));
        collection.push(ProcessingQueue::new(DomainFilter::only("d"), 0, 2, 10, 100));
        assert_eq!(collection.min_ack_level(), Some(2));
    }

    #[test]
    fn merge_widens_filter_and_ack_state() {
        let mut parent = ProcessingQueue::new(
            DomainFilter {
                domain_ids: vec!["a".into()],
                include: false,
            },
            0,
            10,
            20,
            1000,
        );
        let child = ProcessingQueue::new(DomainFilter::only("b"), 1, 5, 15, 500);
        assert!(can_merge(&child, &parent, 10));
        merge_into(child, &mut parent);
        assert_eq!(parent.ack_level(), 5);
        assert_eq!(parent.read_level(), 20);
    }

    #[test]
    fn merge_deferred_when_child_max_level_exceeds_parent() {
        let parent = ProcessingQueue::new(DomainFilter::all(), 0, 0, 10, 100);
        let child = ProcessingQueue::new(DomainFilter::only("b"), 1, 0, 10, 500);
        assert!(!can_merge(&child, &parent, 10));
    }
}
