//! Telemetry for the replication fetcher, processor, DLQ handler and domain queue.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Result;
use once_cell::sync::Lazy;
use opentelemetry_api::global::BoxedTracer;
use opentelemetry_api::trace::Tracer;
use opentelemetry_api::trace::TracerProvider;
use opentelemetry_api::Context as OTelContext;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::Gauge;
use prometheus::GaugeVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;

/// Replication tasks applied successfully, by (cluster, shard).
pub static TASK_APPLIED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_replication_task_applied_count",
            "Replication tasks applied successfully",
        ),
        &["cluster", "shard"],
    )
    .expect("failed to initialise TASK_APPLIED counter")
});

/// Replication tasks that exhausted their retry budget and were sent to the DLQ.
pub static TASK_DLQ: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_replication_task_dlq_count",
            "Replication tasks sent to the dead-letter queue",
        ),
        &["cluster", "shard"],
    )
    .expect("failed to initialise TASK_DLQ counter")
});

/// Most recently observed `lastProcessedMessageID`, by (cluster, shard).
pub static REPLICATION_LAG: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "queuecore_replication_last_processed_id",
            "Last replication message ID processed from a peer cluster",
        ),
        &["cluster", "shard"],
    )
    .expect("failed to initialise REPLICATION_LAG gauge")
});

/// Current size of a cluster's replication DLQ.
pub static DLQ_SIZE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "queuecore_replication_dlq_size",
            "Current size of the replication dead-letter queue",
        ),
        &["cluster"],
    )
    .expect("failed to initialise DLQ_SIZE gauge")
});

/// Ack level of the domain replication queue, exposed per-consumer.
pub static DOMAIN_QUEUE_ACK_LEVEL: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "queuecore_domain_replication_task_ack_level",
        "Minimum ack level across consumers of the domain replication queue",
    )
    .expect("failed to initialise DOMAIN_QUEUE_ACK_LEVEL gauge")
});

/// Duration and error counters for peer admin RPC calls.
pub static OP_COUNT: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_replication_op_count",
            "Number of replication operations performed",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_COUNT counter")
});

pub static OP_ERR: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_replication_op_error",
            "Number of replication operations that resulted in an error",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_ERR counter")
});

pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "queuecore_replication_op_duration_seconds",
            "Duration of replication operations",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_DURATION histogram")
});

static METRICS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register every collector declared in this module with the given registry.
pub fn register_metrics(registry: &prometheus::Registry) -> Result<()> {
    if METRICS_REGISTERED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TASK_APPLIED.clone()),
        Box::new(TASK_DLQ.clone()),
        Box::new(REPLICATION_LAG.clone()),
        Box::new(DLQ_SIZE.clone()),
        Box::new(DOMAIN_QUEUE_ACK_LEVEL.clone()),
        Box::new(OP_COUNT.clone()),
        Box::new(OP_ERR.clone()),
        Box::new(OP_DURATION.clone()),
    ];
    for collector in collectors {
        registry.register(collector)?;
    }
    Ok(())
}

/// Tracer used to annotate peer admin RPC spans.
pub static TRACER: Lazy<BoxedTracer> = Lazy::new(|| {
    opentelemetry_api::global::tracer_provider().versioned_tracer(
        env!("CARGO_PKG_NAME"),
        Some(env!("CARGO_PKG_VERSION")),
        Option::<&str>::None,
        None,
    )
});

/// Start a timer for the named operation, returning it alongside the matching error counter.
pub fn observe_op(op: &'static str) -> (Counter, prometheus::HistogramTimer) {
    OP_COUNT.with_label_values(&[op]).inc();
    let err_count = OP_ERR.with_label_values(&[op]);
    let timer = OP_DURATION.with_label_values(&[op]).start_timer();
    (err_count, timer)
}

pub fn observe_task_applied(cluster: &str, shard: &str) {
    TASK_APPLIED.with_label_values(&[cluster, shard]).inc();
}

pub fn observe_task_dlq(cluster: &str, shard: &str) {
    TASK_DLQ.with_label_values(&[cluster, shard]).inc();
}

pub fn observe_replication_lag(cluster: &str, shard: &str, last_processed_id: i64) {
    REPLICATION_LAG
        .with_label_values(&[cluster, shard])
        .set(last_processed_id as f64);
}

pub fn observe_dlq_size(cluster: &str, size: u64) {
    DLQ_SIZE.with_label_values(&[cluster]).set(size as f64);
}

pub fn observe_domain_queue_ack_level(level: i64) {
    DOMAIN_QUEUE_ACK_LEVEL.set(level as f64);
}

/// Open a span for the named operation, for RPC calls that cross a process boundary.
pub fn trace_op(op: &'static str) -> OTelContext {
    let span = TRACER.start(op);
    OTelContext::current_with_span(span)
}
