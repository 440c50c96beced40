//! Timer queue processor: polls `(visibility_timestamp, task_id)` pairs and look-ahead
//! reads the next future fire time to program its [`TimerGate`].
//!
//! Shares its split/merge and redispatch wiring with [`crate::transfer::TransferQueueProcessor`];
//! see that module for the policy details. This processor differs only in (a) its poll key being
//! a visibility timestamp rather than a task ID, (b) the look-ahead read that arms the
//! [`TimerGate`], (c) acking by visibility timestamp, and (d) having no rate-estimate-driven
//! look-ahead split trigger of its own (the stuck/random policies still apply).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;
use rand::Rng;

use queuecore_conf::ShardProcessorConf;
use queuecore_context::Context;
use queuecore_queue::execution_store::ExecutionStoreBackend;
use queuecore_queue::model::Task;
use queuecore_queue::processing_queue::can_merge;
use queuecore_queue::processing_queue::merge_into;
use queuecore_queue::processing_queue::should_split_pending;
use queuecore_queue::processing_queue::should_split_stuck;
use queuecore_queue::processing_queue::split_domain;
use queuecore_queue::processing_queue::ProcessingQueue;
use queuecore_queue::processing_queue::ProcessingQueueCollection;
use queuecore_queue::rate_limiter::RateLimiter;
use queuecore_queue::redispatcher::Redispatcher;
use queuecore_queue::shard::ShardContext;
use queuecore_queue::timer_gate::TimerGate;

use crate::backoff::Backoff;
use crate::worker::is_abandoned;
use crate::worker::TaskWorker;
use crate::ProcessorState;

type TaskResult = (i64, i64, Result<()>);

/// How many consecutive look-ahead read failures are tolerated before falling back to
/// scheduling the gate at `max_read_level` instead (design note (d) in the timer processor).
const LOOK_AHEAD_RETRY_LIMIT: u32 = 3;

/// Polls the timer task list up to `now` and maintains a single-task look-ahead read beyond
/// it so the [`TimerGate`] wakes the processor exactly when the next timer becomes due.
pub struct TimerQueueProcessor {
    state: ProcessorState,
    shard: Arc<dyn ShardContext>,
    store: Arc<dyn ExecutionStoreBackend>,
    worker: Arc<dyn TaskWorker>,
    conf: ShardProcessorConf,
    levels: Vec<ProcessingQueueCollection>,
    redispatcher: Redispatcher,
    limiter: Arc<RateLimiter>,
    gate: TimerGate,
    look_ahead_failures: u32,
    pool: FuturesUnordered<tokio::task::JoinHandle<TaskResult>>,
}

impl TimerQueueProcessor {
    pub fn new(
        shard: Arc<dyn ShardContext>,
        store: Arc<dyn ExecutionStoreBackend>,
        worker: Arc<dyn TaskWorker>,
        conf: ShardProcessorConf,
        limiter: Arc<RateLimiter>,
        initial: ProcessingQueue,
    ) -> Self {
        let mut level0 = ProcessingQueueCollection::new();
        level0.push(initial);
        TimerQueueProcessor {
            state: ProcessorState::Initialized,
            shard,
            store,
            worker,
            conf,
            levels: vec![level0],
            redispatcher: Redispatcher::new(),
            limiter,
            gate: TimerGate::new(),
            look_ahead_failures: 0,
            pool: FuturesUnordered::new(),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub async fn run(
        mut self,
        context: Context,
        exit: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        self.state = ProcessorState::Started;
        tokio::pin!(exit);

        let mut backoff = Backoff::new(&self.conf.backoff);
        let mut ack_ticker =
            tokio::time::interval(Duration::from_millis(self.conf.update_ack_interval_ms));
        let mut redispatch_ticker =
            tokio::time::interval(Duration::from_millis(self.conf.task_redispatch_interval_ms));
        let mut split_ticker =
            tokio::time::interval(Duration::from_millis(self.conf.split.split_queue_interval_ms));

        loop {
            let now_ms = self.shard.time_source().now_ms();
            tokio::select! {
                _ = &mut exit => break,
                _ = ack_ticker.tick() => {
                    self.update_ack_levels(&context).await?;
                }
                _ = redispatch_ticker.tick() => {
                    self.drain_redispatch(&context);
                }
                _ = split_ticker.tick() => {
                    self.evaluate_split_merge();
                }
                Some(result) = self.pool.next(), if !self.pool.is_empty() => {
                    self.handle_completion(&context, result).await?;
                }
                _ = self.gate.wait(now_ms) => {
                    match self.poll_once(&context, now_ms).await {
                        Ok(()) => backoff.success(),
                        Err(error) => backoff.retry(&context, error).await?,
                    }
                }
            }
        }

        for handle in self.pool.iter() {
            handle.abort();
        }
        self.state = ProcessorState::Stopped;
        Ok(())
    }

    async fn poll_once(&mut self, context: &Context, now_ms: i64) -> Result<()> {
        for level in 0..self.levels.len() {
            let (read_level, filter) = match self.levels[level].active() {
                Some(queue) => (queue.read_level(), queue.filter.clone()),
                None => continue,
            };
            if self.limiter.acquire(Duration::from_secs(5)).await.is_err() {
                continue;
            }

            let page = self
                .store
                .get_timer_index_tasks(context, read_level, now_ms, self.conf.batch_size, None)
                .await?;

            let mut filtered_ids = Vec::new();
            let mut domain_counts: HashMap<String, usize> = HashMap::new();
            for task in page.tasks {
                if !filter.matches(&task.workflow.domain_id) {
                    continue;
                }
                filtered_ids.push(task.task_id);
                *domain_counts.entry(task.workflow.domain_id.clone()).or_insert(0) += 1;
                self.dispatch(context.clone(), task);
            }
            if let Some(queue) = self.levels[level].active_mut() {
                queue.record_read(filtered_ids, now_ms);
            }
            for (domain_id, pending_count) in domain_counts {
                self.evaluate_pending_split(&domain_id, pending_count);
            }
        }

        self.look_ahead(context, now_ms).await
    }

    fn dispatch(&mut self, context: Context, task: Task) {
        if self.pool.len() >= self.conf.concurrent_tasks {
            self.redispatcher.add_task(task);
            return;
        }
        let worker = Arc::clone(&self.worker);
        let task_id = task.task_id;
        let visibility_ms = task.visibility_timestamp_ms;
        let handle = tokio::spawn(async move {
            let result = worker.handle(&context, &task).await;
            (task_id, visibility_ms, result)
        });
        self.pool.push(handle);
    }

    fn drain_redispatch(&mut self, context: &Context) {
        let mut redispatcher = std::mem::take(&mut self.redispatcher);
        redispatcher.redispatch(0, |task| {
            if self.pool.len() >= self.conf.concurrent_tasks {
                return false;
            }
            self.dispatch(context.clone(), task.clone());
            true
        });
        self.redispatcher = redispatcher;
    }

    /// Issue the single-task look-ahead read beyond `now_ms` and (re)arm the [`TimerGate`].
    async fn look_ahead(&mut self, context: &Context, now_ms: i64) -> Result<()> {
        let result = self
            .store
            .get_timer_index_tasks(context, now_ms, i64::MAX, 1, None)
            .await;
        match result {
            Ok(page) => {
                self.look_ahead_failures = 0;
                match page.tasks.first() {
                    Some(task) => self.gate.set(task.visibility_timestamp_ms),
                    None => self.gate.clear(),
                }
            }
            Err(_) if self.look_ahead_failures < LOOK_AHEAD_RETRY_LIMIT => {
                self.look_ahead_failures += 1;
                self.gate.set(now_ms);
            }
            Err(_) => {
                self.look_ahead_failures = 0;
                self.gate.set(now_ms);
            }
        }
        Ok(())
    }

    async fn handle_completion(
        &mut self,
        context: &Context,
        result: std::result::Result<TaskResult, tokio::task::JoinError>,
    ) -> Result<()> {
        let (task_id, visibility_ms, outcome) = match result {
            Ok(result) => result,
            Err(_join_error) => return Ok(()),
        };
        let abandon = matches!(&outcome, Err(error) if is_abandoned(error));
        if outcome.is_ok() || abandon {
            for level in self.levels.iter_mut() {
                for queue in level.iter_mut() {
                    queue.complete(task_id);
                }
            }
            self.store
                .complete_timer_task(context, visibility_ms, task_id)
                .await?;
        }
        Ok(())
    }

    async fn update_ack_levels(&mut self, context: &Context) -> Result<()> {
        let mut min_ack = i64::MAX;
        for level in self.levels.iter_mut() {
            for queue in level.iter_mut() {
                let (ack, _advanced) = queue.update_ack_level();
                min_ack = min_ack.min(ack);
            }
        }
        if min_ack != i64::MAX {
            self.shard.update_timer_ack_level(context, min_ack).await?;
        }
        Ok(())
    }

    /// Evaluate the split/merge policies described by the split/merge design for this shard.
    fn evaluate_split_merge(&mut self) {
        let split_conf = self.conf.split.clone();
        if self.levels.len() as u32 > split_conf.split_max_level {
            return;
        }

        // Stuck-task split: promote a stuck active queue into a look-ahead child.
        if let Some(queue) = self.levels[0].active() {
            if should_split_stuck(queue.stuck_cycles(), split_conf.stuck_task_split_threshold) {
                if let Some(domain_id) = queue.filter.domain_ids.first().cloned() {
                    self.split_off(0, &domain_id, split_conf.split_look_ahead_ms as i64);
                }
            }
        }

        // Random split: occasionally probe an arbitrary domain for asymmetric load.
        if rand::thread_rng().gen_bool(split_conf.random_split_probability.clamp(0.0, 1.0)) {
            if let Some(queue) = self.levels[0].active() {
                if let Some(domain_id) = queue.filter.domain_ids.first().cloned() {
                    self.split_off(0, &domain_id, 0);
                }
            }
        }

        self.merge_eligible();
    }

    /// Pending-task split trigger: call after a batch dispatch that revealed a hot domain.
    pub fn evaluate_pending_split(&mut self, domain_id: &str, pending_count: usize) {
        if should_split_pending(pending_count, self.conf.split.pending_task_split_threshold as usize) {
            self.split_off(0, domain_id, 0);
        }
    }

    fn split_off(&mut self, level: usize, domain_id: &str, look_ahead_ms: i64) {
        let outcome = match self.levels[level].active() {
            Some(queue) => split_domain(queue, domain_id, look_ahead_ms, 32),
            None => return,
        };
        let active_index = self
            .levels[level]
            .iter()
            .position(|q| q.filter.matches(domain_id))
            .unwrap_or(0);
        let child_read_level = self.levels[level]
            .active()
            .map(|q| q.read_level())
            .unwrap_or(-1);
        let child = self.levels[level].apply_split(active_index, outcome, child_read_level);
        if self.levels.len() <= level + 1 {
            self.levels.push(ProcessingQueueCollection::new());
        }
        self.levels[level + 1].push(child);
        queuecore_queue::telemetry::observe_split();
    }

    fn merge_eligible(&mut self) {
        for level in (1..self.levels.len()).rev() {
            let mut merged_indices = Vec::new();
            for index in 0..self.levels[level].len() {
                let parent_level = level - 1;
                let Some(parent) = self.levels[parent_level].active() else { continue };
                let child = match self.levels[level].iter().nth(index) {
                    Some(child) => child,
                    None => continue,
                };
                if can_merge(child, parent, 1000) {
                    merged_indices.push(index);
                }
            }
            for index in merged_indices.into_iter().rev() {
                let child = self.levels[level].take(index);
                if let Some(parent) = self.levels[level - 1].active_mut() {
                    merge_into(child, parent);
                    queuecore_queue::telemetry::observe_merge();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    use queuecore_context::Context;
    use queuecore_queue::execution_store::ExecutionStoreBackend;
    use queuecore_queue::execution_store::TaskPage;
    use queuecore_queue::model::DomainFilter;
    use queuecore_queue::model::Task;
    use queuecore_queue::model::TaskCategory;
    use queuecore_queue::model::WorkflowRef;
    use queuecore_queue::processing_queue::ProcessingQueue;
    use queuecore_queue::rate_limiter::RateLimiter;
    use queuecore_queue::shard::ShardContext;
    use queuecore_queue::shard::SystemTimeSource;

    use super::TimerQueueProcessor;
    use crate::worker::TaskWorker;

    struct FixtureStore {
        tasks: Mutex<Vec<Task>>,
    }

    #[async_trait]
    impl ExecutionStoreBackend for FixtureStore {
        async fn get_transfer_tasks(
            &self,
            _: &Context,
            _: i64,
            _: i64,
            _: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn complete_transfer_task(&self, _: &Context, _: i64) -> Result<()> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn range_complete_transfer_task(&self, _: &Context, _: i64, _: i64) -> Result<()> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn get_timer_index_tasks(
            &self,
            _: &Context,
            read_level: i64,
            now_ms: i64,
            batch_size: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            let tasks: Vec<Task> = self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.visibility_timestamp_ms > read_level && t.visibility_timestamp_ms <= now_ms)
                .take(batch_size as usize)
                .cloned()
                .collect();
            Ok(TaskPage {
                tasks,
                next_page_token: None,
            })
        }
        async fn complete_timer_task(&self, _: &Context, _: i64, id: i64) -> Result<()> {
            self.tasks.lock().unwrap().retain(|t| t.task_id != id);
            Ok(())
        }
        async fn range_complete_timer_task(&self, _: &Context, _: i64, _: i64) -> Result<()> {
            Ok(())
        }
        async fn get_replication_tasks(
            &self,
            _: &Context,
            _: &str,
            _: i64,
            _: i64,
            _: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn range_complete_replication_task(
            &self,
            _: &Context,
            _: &str,
            _: i64,
        ) -> Result<()> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn put_replication_task_to_dlq(&self, _: &Context, _: &str, _: Task) -> Result<()> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn get_replication_tasks_from_dlq(
            &self,
            _: &Context,
            _: &str,
            _: i64,
            _: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn range_delete_replication_task_from_dlq(
            &self,
            _: &Context,
            _: &str,
            _: i64,
        ) -> Result<()> {
            unimplemented!("not exercised by timer queue tests")
        }
        async fn get_replication_dlq_size(&self, _: &Context, _: &str) -> Result<u64> {
            unimplemented!("not exercised by timer queue tests")
        }
    }

    struct FixtureShard;

    #[async_trait]
    impl ShardContext for FixtureShard {
        fn shard_id(&self) -> &str {
            "shard-0"
        }
        async fn update_transfer_ack_level(&self, _: &Context, _: i64) -> Result<()> {
            Ok(())
        }
        async fn get_transfer_ack_level(&self, _: &Context) -> Result<i64> {
            Ok(-1)
        }
        async fn update_timer_ack_level(&self, _: &Context, _: i64) -> Result<()> {
            Ok(())
        }
        async fn get_timer_ack_level(&self, _: &Context) -> Result<i64> {
            Ok(-1)
        }
        async fn update_cluster_replication_level(&self, _: &Context, _: &str, _: i64) -> Result<()> {
            Ok(())
        }
        async fn get_cluster_replication_level(&self, _: &Context, _: &str) -> Result<i64> {
            Ok(-1)
        }
        async fn update_replicator_dlq_ack_level(&self, _: &Context, _: &str, _: i64) -> Result<()> {
            Ok(())
        }
        fn time_source(&self) -> Arc<dyn queuecore_queue::shard::TimeSource> {
            Arc::new(SystemTimeSource)
        }
    }

    struct NoopWorker;

    #[async_trait]
    impl TaskWorker for NoopWorker {
        async fn handle(&self, _: &Context, _: &Task) -> Result<()> {
            Ok(())
        }
    }

    fn task(id: i64, visibility_ms: i64) -> Task {
        Task {
            task_id: id,
            category: TaskCategory::Timer,
            visibility_timestamp_ms: visibility_ms,
            workflow: WorkflowRef {
                domain_id: "d".into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            payload: serde_json::Value::Null,
        }
    }

    fn task_for_domain(id: i64, visibility_ms: i64, domain_id: &str) -> Task {
        Task {
            workflow: WorkflowRef {
                domain_id: domain_id.into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            ..task(id, visibility_ms)
        }
    }

    #[tokio::test]
    async fn poll_once_dispatches_due_tasks_and_advances_read_level() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(vec![task(0, 10), task(1, 20), task(2, 30)]),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let initial = ProcessingQueue::new(DomainFilter::all(), 0, -1, -1, i64::MAX);
        let mut processor = TimerQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            queuecore_conf::ShardProcessorConf::default(),
            limiter,
            initial,
        );

        processor.poll_once(&context, 25).await.unwrap();
        assert_eq!(processor.levels[0].active().unwrap().read_level(), 25);
        assert_eq!(processor.pool.len(), 2);
    }

    #[tokio::test]
    async fn poll_once_drops_tasks_excluded_by_the_active_queue_filter() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(vec![
                task_for_domain(0, 10, "kept"),
                task_for_domain(1, 20, "excluded"),
            ]),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let filter = DomainFilter {
            domain_ids: vec!["excluded".into()],
            include: false,
        };
        let initial = ProcessingQueue::new(filter, 0, -1, -1, i64::MAX);
        let mut processor = TimerQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            queuecore_conf::ShardProcessorConf::default(),
            limiter,
            initial,
        );

        processor.poll_once(&context, 25).await.unwrap();
        assert_eq!(processor.pool.len(), 1);
    }

    #[tokio::test]
    async fn drain_redispatch_actually_submits_buffered_tasks() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(Vec::new()),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let initial = ProcessingQueue::new(DomainFilter::all(), 0, -1, -1, i64::MAX);
        let mut conf = queuecore_conf::ShardProcessorConf::default();
        conf.concurrent_tasks = 1;
        let mut processor = TimerQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            conf,
            limiter,
            initial,
        );

        processor.dispatch(context.clone(), task(0, 10));
        processor.dispatch(context.clone(), task(1, 20));
        assert_eq!(processor.pool.len(), 1);
        assert_eq!(processor.redispatcher.len(), 1);

        processor.pool.clear();
        processor.drain_redispatch(&context);
        assert_eq!(processor.redispatcher.len(), 0);
        assert_eq!(processor.pool.len(), 1);
    }
}
