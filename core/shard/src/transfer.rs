//! Transfer queue processor: polls task IDs in ascending order and dispatches them to workers.
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

use crate::backoff::Backoff;
use crate::worker::is_abandoned;
use crate::worker::TaskWorker;
use crate::ProcessorState;

type TaskResult = (i64, Result<()>);

/// Polls the transfer task list in strictly ascending ID order and fans tasks out to workers.
///
/// One instance is owned per shard. It holds one [`ProcessingQueueCollection`] per nesting
/// level, a [`Redispatcher`] for tasks the worker pool rejected, and a [`RateLimiter`] gating
/// reads against persistence.
pub struct TransferQueueProcessor {
    state: ProcessorState,
    shard: Arc<dyn ShardContext>,
    store: Arc<dyn ExecutionStoreBackend>,
    worker: Arc<dyn TaskWorker>,
    conf: ShardProcessorConf,
    levels: Vec<ProcessingQueueCollection>,
    redispatcher: Redispatcher,
    limiter: Arc<RateLimiter>,
    pool: FuturesUnordered<tokio::task::JoinHandle<TaskResult>>,
}

impl TransferQueueProcessor {
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
        TransferQueueProcessor {
            state: ProcessorState::Initialized,
            shard,
            store,
            worker,
            conf,
            levels: vec![level0],
            redispatcher: Redispatcher::new(),
            limiter,
            pool: FuturesUnordered::new(),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Run the poll/dispatch/ack/split loop until `exit` resolves.
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
                _ = self.next_poll_delay() => {
                    match self.poll_once(&context).await {
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

    fn next_poll_delay(&self) -> tokio::time::Sleep {
        let jitter_ms = rand::thread_rng().gen_range(0..100);
        tokio::time::sleep(Duration::from_millis(jitter_ms))
    }

    /// One iteration of step 3-6 in the transfer queue processor poll loop.
    async fn poll_once(&mut self, context: &Context) -> Result<()> {
        if self.redispatcher.len() >= self.conf.max_redispatch_queue_size {
            return Ok(());
        }

        for level in 0..self.levels.len() {
            let (read_level, max_level, filter) = match self.levels[level].active() {
                Some(queue) => (queue.read_level(), queue.max_level(), queue.filter.clone()),
                None => continue,
            };
            if self.limiter.acquire(Duration::from_secs(5)).await.is_err() {
                continue;
            }

            let page = self
                .store
                .get_transfer_tasks(context, read_level, max_level, self.conf.batch_size, None)
                .await?;
            if page.tasks.is_empty() {
                continue;
            }

            let new_read_level = page
                .tasks
                .last()
                .map(|t| t.task_id)
                .unwrap_or(read_level)
                .max(read_level);

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
                queue.record_read(filtered_ids, new_read_level);
            }
            for (domain_id, pending_count) in domain_counts {
                self.evaluate_pending_split(&domain_id, pending_count);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, context: Context, task: Task) {
        if self.pool.len() >= self.conf.concurrent_tasks {
            self.redispatcher.add_task(task);
            return;
        }
        let worker = Arc::clone(&self.worker);
        let task_id = task.task_id;
        let handle = tokio::spawn(async move {
            let result = worker.handle(&context, &task).await;
            (task_id, result)
        });
        self.pool.push(handle);
    }

    fn drain_redispatch(&mut self, context: &Context) {
        // Take the buffer out so the try_submit closure can hold `&mut self` to actually
        // dispatch; tasks the closure rejects (or doesn't reach) stay queued on the buffer
        // we put back below.
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

    async fn handle_completion(
        &mut self,
        context: &Context,
        result: std::result::Result<TaskResult, tokio::task::JoinError>,
    ) -> Result<()> {
        let (task_id, outcome) = match result {
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
            self.store.complete_transfer_task(context, task_id).await?;
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
            self.shard.update_transfer_ack_level(context, min_ack).await?;
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

    use super::TransferQueueProcessor;
    use crate::worker::TaskWorker;

    struct FixtureStore {
        tasks: Mutex<Vec<Task>>,
    }

    #[async_trait]
    impl ExecutionStoreBackend for FixtureStore {
        async fn get_transfer_tasks(
            &self,
            _: &Context,
            read_level: i64,
            max_read_level: i64,
            batch_size: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            let tasks: Vec<Task> = self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.task_id > read_level && t.task_id <= max_read_level)
                .take(batch_size as usize)
                .cloned()
                .collect();
            Ok(TaskPage {
                tasks,
                next_page_token: None,
            })
        }
        async fn complete_transfer_task(&self, _: &Context, id: i64) -> Result<()> {
            self.tasks.lock().unwrap().retain(|t| t.task_id != id);
            Ok(())
        }
        async fn range_complete_transfer_task(&self, _: &Context, _: i64, _: i64) -> Result<()> {
            Ok(())
        }
        async fn get_timer_index_tasks(
            &self,
            _: &Context,
            _: i64,
            _: i64,
            _: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn complete_timer_task(&self, _: &Context, _: i64, _: i64) -> Result<()> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn range_complete_timer_task(&self, _: &Context, _: i64, _: i64) -> Result<()> {
            unimplemented!("not exercised by transfer queue tests")
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
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn range_complete_replication_task(
            &self,
            _: &Context,
            _: &str,
            _: i64,
        ) -> Result<()> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn put_replication_task_to_dlq(&self, _: &Context, _: &str, _: Task) -> Result<()> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn get_replication_tasks_from_dlq(
            &self,
            _: &Context,
            _: &str,
            _: i64,
            _: u32,
            _: Option<Vec<u8>>,
        ) -> Result<TaskPage> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn range_delete_replication_task_from_dlq(
            &self,
            _: &Context,
            _: &str,
            _: i64,
        ) -> Result<()> {
            unimplemented!("not exercised by transfer queue tests")
        }
        async fn get_replication_dlq_size(&self, _: &Context, _: &str) -> Result<u64> {
            unimplemented!("not exercised by transfer queue tests")
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

    #[tokio::test]
    async fn poll_once_dispatches_tasks_and_advances_read_level() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(vec![task(0), task(1), task(2)]),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let initial = ProcessingQueue::new(DomainFilter::all(), 0, -1, -1, 1000);
        let mut processor = TransferQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            queuecore_conf::ShardProcessorConf::default(),
            limiter,
            initial,
        );

        processor.poll_once(&context).await.unwrap();
        assert_eq!(processor.levels[0].active().unwrap().read_level(), 2);
        assert_eq!(processor.pool.len(), 3);
    }

    fn task_for_domain(id: i64, domain_id: &str) -> Task {
        Task {
            workflow: WorkflowRef {
                domain_id: domain_id.into(),
                workflow_id: "w".into(),
                run_id: "r".into(),
            },
            ..task(id)
        }
    }

    #[tokio::test]
    async fn poll_once_drops_tasks_excluded_by_the_active_queue_filter() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(vec![
                task_for_domain(0, "kept"),
                task_for_domain(1, "excluded"),
                task_for_domain(2, "kept"),
            ]),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let filter = DomainFilter {
            domain_ids: vec!["excluded".into()],
            include: false,
        };
        let initial = ProcessingQueue::new(filter, 0, -1, -1, 1000);
        let mut processor = TransferQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            queuecore_conf::ShardProcessorConf::default(),
            limiter,
            initial,
        );

        processor.poll_once(&context).await.unwrap();
        // The read level still advances past the excluded task's ID...
        assert_eq!(processor.levels[0].active().unwrap().read_level(), 2);
        // ...but only the two matching tasks were actually dispatched.
        assert_eq!(processor.pool.len(), 2);
    }

    #[tokio::test]
    async fn drain_redispatch_actually_submits_buffered_tasks() {
        let context = Context::fixture();
        let store = Arc::new(FixtureStore {
            tasks: Mutex::new(Vec::new()),
        });
        let limiter = Arc::new(RateLimiter::new(1000.0, 1000.0));
        let initial = ProcessingQueue::new(DomainFilter::all(), 0, -1, -1, 1000);
        let mut conf = queuecore_conf::ShardProcessorConf::default();
        conf.concurrent_tasks = 1;
        let mut processor = TransferQueueProcessor::new(
            Arc::new(FixtureShard),
            store,
            Arc::new(NoopWorker),
            conf,
            limiter,
            initial,
        );

        // Fill the only worker slot, then force a second task into the redispatch buffer.
        processor.dispatch(context.clone(), task(0));
        processor.dispatch(context.clone(), task(1));
        assert_eq!(processor.pool.len(), 1);
        assert_eq!(processor.redispatcher.len(), 1);

        // Free up the slot and drain: the buffered task must actually be dispatched, not
        // just dropped from the buffer.
        processor.pool.clear();
        processor.drain_redispatch(&context);
        assert_eq!(processor.redispatcher.len(), 0);
        assert_eq!(processor.pool.len(), 1);
    }
}
