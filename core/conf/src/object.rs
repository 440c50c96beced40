//! Data object storing the task-queue core's configuration.
use serde::Deserialize;
use serde::Serialize;

use replisdk::runtime::telemetry::TelemetryConfig;

use super::RuntimeConf;

/// Global configuration for the task-queue core process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    /// Peer admin RPC client configuration (replication fetch, DLQ re-fetch).
    pub peer: BackendConf,

    /// Replication pipeline tuning.
    #[serde(default)]
    pub replication: ReplicationConf,

    /// Process runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConf,

    /// Shard transfer/timer queue processor tuning.
    #[serde(default)]
    pub shard: ShardProcessorConf,

    /// Persistence backend configuration (queue store + execution store).
    pub store: BackendConf,

    /// Telemetry configuration for the process.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Unstructured configuration for runtime selected service backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendConf {
    /// ID of the backend selected to provide the service.
    pub backend: String,

    /// Backend specific configuration options.
    #[serde(default, flatten)]
    pub options: serde_json::Value,
}

/// Backoff used when a poll loop's interaction with persistence fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessorBackoff {
    /// Maximum time, in seconds, to wait between retries.
    #[serde(default = "ProcessorBackoff::default_max_delay")]
    pub max_delay: u64,

    /// Maximum number of retries before a permanent-storage shutdown is triggered.
    #[serde(default = "ProcessorBackoff::default_max_retries")]
    pub max_retries: u16,

    /// Backoff multiplier applied after every subsequent failure.
    #[serde(default = "ProcessorBackoff::default_multiplier")]
    pub multiplier: u32,

    /// Initial delay, in milliseconds, before the first retry.
    #[serde(default = "ProcessorBackoff::default_start_delay")]
    pub start_delay: u64,
}

impl ProcessorBackoff {
    fn default_max_delay() -> u64 {
        30
    }

    fn default_max_retries() -> u16 {
        10
    }

    fn default_multiplier() -> u32 {
        2
    }

    fn default_start_delay() -> u64 {
        200
    }
}

impl Default for ProcessorBackoff {
    fn default() -> Self {
        ProcessorBackoff {
            max_delay: Self::default_max_delay(),
            max_retries: Self::default_max_retries(),
            multiplier: Self::default_multiplier(),
            start_delay: Self::default_start_delay(),
        }
    }
}

/// Tuning for the processing queue split/merge policy engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitConf {
    /// Pending task count in a domain before it is split into its own queue.
    #[serde(default = "SplitConf::default_pending_task_split_threshold")]
    pub pending_task_split_threshold: u64,

    /// Number of stalled poll cycles for a domain before it is split into its own queue.
    #[serde(default = "SplitConf::default_stuck_task_split_threshold")]
    pub stuck_task_split_threshold: u32,

    /// Probability, per evaluation, of splitting an arbitrary domain to probe for load skew.
    #[serde(default = "SplitConf::default_random_split_probability")]
    pub random_split_probability: f64,

    /// Maximum nesting depth a processing queue collection is allowed to reach.
    #[serde(default = "SplitConf::default_split_max_level")]
    pub split_max_level: u32,

    /// Interval, in milliseconds, between split/merge policy evaluations.
    #[serde(default = "SplitConf::default_split_queue_interval_ms")]
    pub split_queue_interval_ms: u64,

    /// Default look-ahead window, in milliseconds, granted to a look-ahead split.
    #[serde(default = "SplitConf::default_split_look_ahead_ms")]
    pub split_look_ahead_ms: u64,
}

impl SplitConf {
    fn default_pending_task_split_threshold() -> u64 {
        10_000
    }

    fn default_stuck_task_split_threshold() -> u32 {
        3
    }

    fn default_random_split_probability() -> f64 {
        0.01
    }

    fn default_split_max_level() -> u32 {
        2
    }

    fn default_split_queue_interval_ms() -> u64 {
        60_000
    }

    fn default_split_look_ahead_ms() -> u64 {
        300_000
    }
}

impl Default for SplitConf {
    fn default() -> Self {
        SplitConf {
            pending_task_split_threshold: Self::default_pending_task_split_threshold(),
            stuck_task_split_threshold: Self::default_stuck_task_split_threshold(),
            random_split_probability: Self::default_random_split_probability(),
            split_max_level: Self::default_split_max_level(),
            split_queue_interval_ms: Self::default_split_queue_interval_ms(),
            split_look_ahead_ms: Self::default_split_look_ahead_ms(),
        }
    }
}

/// Configuration for the transfer/timer queue processors of a shard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardProcessorConf {
    /// Backoff applied to persistence poll failures.
    #[serde(default)]
    pub backoff: ProcessorBackoff,

    /// Maximum number of tasks read from persistence in a single poll.
    #[serde(default = "ShardProcessorConf::default_batch_size")]
    pub batch_size: u32,

    /// Maximum number of tasks executed concurrently by the worker pool.
    #[serde(default = "ShardProcessorConf::default_concurrent_tasks")]
    pub concurrent_tasks: usize,

    /// Upper bound, in milliseconds, on the delay between polls absent other signals.
    #[serde(default = "ShardProcessorConf::default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Delay, in milliseconds, applied to a level throttled by rate limiting or redispatch backlog.
    #[serde(default = "ShardProcessorConf::default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,

    /// Redispatch buffer size above which the poll loop stops reading new tasks.
    #[serde(default = "ShardProcessorConf::default_max_redispatch_queue_size")]
    pub max_redispatch_queue_size: usize,

    /// Interval, in milliseconds, of the background redispatch sweep.
    #[serde(default = "ShardProcessorConf::default_task_redispatch_interval_ms")]
    pub task_redispatch_interval_ms: u64,

    /// Interval, in milliseconds, between ack-level advancement attempts.
    #[serde(default = "ShardProcessorConf::default_update_ack_interval_ms")]
    pub update_ack_interval_ms: u64,

    /// Persistence read rate allowed per shard, in tokens (tasks) per second.
    #[serde(default = "ShardProcessorConf::default_rate_limit_per_sec")]
    pub rate_limit_per_sec: f64,

    /// Token bucket burst capacity for the per-shard rate limiter.
    #[serde(default = "ShardProcessorConf::default_rate_limit_burst")]
    pub rate_limit_burst: f64,

    /// Split/merge policy tuning.
    #[serde(default)]
    pub split: SplitConf,
}

impl ShardProcessorConf {
    fn default_batch_size() -> u32 {
        100
    }

    fn default_concurrent_tasks() -> usize {
        let parallel = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        parallel * 2
    }

    fn default_max_poll_interval_ms() -> u64 {
        60_000
    }

    fn default_poll_backoff_ms() -> u64 {
        5_000
    }

    fn default_max_redispatch_queue_size() -> usize {
        10_000
    }

    fn default_task_redispatch_interval_ms() -> u64 {
        5_000
    }

    fn default_update_ack_interval_ms() -> u64 {
        1_000
    }

    fn default_rate_limit_per_sec() -> f64 {
        1_000.0
    }

    fn default_rate_limit_burst() -> f64 {
        100.0
    }
}

impl Default for ShardProcessorConf {
    fn default() -> Self {
        ShardProcessorConf {
            backoff: Default::default(),
            batch_size: Self::default_batch_size(),
            concurrent_tasks: Self::default_concurrent_tasks(),
            max_poll_interval_ms: Self::default_max_poll_interval_ms(),
            poll_backoff_ms: Self::default_poll_backoff_ms(),
            max_redispatch_queue_size: Self::default_max_redispatch_queue_size(),
            task_redispatch_interval_ms: Self::default_task_redispatch_interval_ms(),
            update_ack_interval_ms: Self::default_update_ack_interval_ms(),
            rate_limit_per_sec: Self::default_rate_limit_per_sec(),
            rate_limit_burst: Self::default_rate_limit_burst(),
            split: Default::default(),
        }
    }
}

/// Configuration for the replication task fetcher, processor and DLQ handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConf {
    /// Source clusters this shard pulls replication tasks from and accepts DLQ re-fetches
    /// for. One [`super::BackendConf::peer`] client is shared across all of them.
    #[serde(default)]
    pub clusters: Vec<String>,

    /// Wait, in milliseconds, between first-phase retries of a failed replication task.
    #[serde(default = "ReplicationConf::default_error_retry_wait_ms")]
    pub error_retry_wait_ms: u64,

    /// Number of first-phase retries before moving to the second, slower, retry phase.
    #[serde(default = "ReplicationConf::default_error_retry_max_attempts")]
    pub error_retry_max_attempts: u16,

    /// Starting wait, in milliseconds, for second-phase retries.
    #[serde(default = "ReplicationConf::default_error_second_retry_wait_ms")]
    pub error_second_retry_wait_ms: u64,

    /// Maximum wait, in milliseconds, reached by second-phase retry growth.
    #[serde(default = "ReplicationConf::default_error_second_retry_max_wait_ms")]
    pub error_second_retry_max_wait_ms: u64,

    /// Total time, in seconds, a task may spend in the second retry phase before DLQ.
    #[serde(default = "ReplicationConf::default_error_second_retry_expiration_sec")]
    pub error_second_retry_expiration_sec: u64,

    /// Minimum interval, in milliseconds, between sync-shard-status forwards.
    #[serde(default = "ReplicationConf::default_shard_sync_min_interval_ms")]
    pub shard_sync_min_interval_ms: u64,

    /// Interval, in seconds, between cleanup sweeps that complete acked source tasks.
    #[serde(default = "ReplicationConf::default_cleanup_interval_sec")]
    pub cleanup_interval_sec: u64,

    /// Interval, in seconds, between DLQ size gauge emissions.
    #[serde(default = "ReplicationConf::default_dlq_metrics_interval_sec")]
    pub dlq_metrics_interval_sec: u64,

    /// Starting backoff, in milliseconds, applied when a poll returns no tasks.
    #[serde(default = "ReplicationConf::default_no_task_backoff_ms")]
    pub no_task_backoff_ms: u64,
}

impl ReplicationConf {
    fn default_error_retry_wait_ms() -> u64 {
        50
    }

    fn default_error_retry_max_attempts() -> u16 {
        5
    }

    fn default_error_second_retry_wait_ms() -> u64 {
        5_000
    }

    fn default_error_second_retry_max_wait_ms() -> u64 {
        300_000
    }

    fn default_error_second_retry_expiration_sec() -> u64 {
        3600
    }

    fn default_shard_sync_min_interval_ms() -> u64 {
        5_000
    }

    fn default_cleanup_interval_sec() -> u64 {
        30
    }

    fn default_dlq_metrics_interval_sec() -> u64 {
        60
    }

    fn default_no_task_backoff_ms() -> u64 {
        100
    }
}

impl Default for ReplicationConf {
    fn default() -> Self {
        ReplicationConf {
            clusters: Vec::new(),
            error_retry_wait_ms: Self::default_error_retry_wait_ms(),
            error_retry_max_attempts: Self::default_error_retry_max_attempts(),
            error_second_retry_wait_ms: Self::default_error_second_retry_wait_ms(),
            error_second_retry_max_wait_ms: Self::default_error_second_retry_max_wait_ms(),
            error_second_retry_expiration_sec: Self::default_error_second_retry_expiration_sec(),
            shard_sync_min_interval_ms: Self::default_shard_sync_min_interval_ms(),
            cleanup_interval_sec: Self::default_cleanup_interval_sec(),
            dlq_metrics_interval_sec: Self::default_dlq_metrics_interval_sec(),
            no_task_backoff_ms: Self::default_no_task_backoff_ms(),
        }
    }
}
