//! Telemetry shared by persisted queues, ack managers and processing queues.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Result;
use once_cell::sync::Lazy;
use opentelemetry_api::global::BoxedTracer;
use opentelemetry_api::trace::TracerProvider;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::Gauge;
use prometheus::GaugeVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;

/// Total number of messages enqueued onto a persisted queue.
pub static ENQUEUE_COUNT: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_queue_enqueue_count",
            "Total number of messages enqueued onto a persisted queue",
        ),
        &["queue"],
    )
    .expect("failed to initialise ENQUEUE_COUNT counter")
});

/// Number of enqueue operations that resulted in an error.
pub static ENQUEUE_ERR: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_queue_enqueue_error",
            "Number of enqueue operations that resulted in an error",
        ),
        &["queue"],
    )
    .expect("failed to initialise ENQUEUE_ERR counter")
});

/// Duration of persisted-queue backend operations.
pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "queuecore_queue_op_duration_seconds",
            "Duration of persisted-queue backend operations",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_DURATION histogram")
});

/// Most recently observed ack level for a (queue, consumer) pair.
pub static ACK_LEVEL: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new(
            "queuecore_queue_ack_level",
            "Most recently observed ack level for a queue consumer",
        ),
        &["queue", "consumer"],
    )
    .expect("failed to initialise ACK_LEVEL gauge")
});

/// Number of processing-queue split operations performed.
pub static SPLIT_COUNT: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "queuecore_processing_queue_split_count",
        "Number of processing-queue split operations performed",
    )
    .expect("failed to initialise SPLIT_COUNT counter")
});

/// Number of processing-queue merge operations performed.
pub static MERGE_COUNT: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "queuecore_processing_queue_merge_count",
        "Number of processing-queue merge operations performed",
    )
    .expect("failed to initialise MERGE_COUNT counter")
});

/// Current depth of the redispatch buffer.
pub static REDISPATCH_DEPTH: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "queuecore_redispatch_queue_depth",
        "Current depth of the redispatch buffer",
    )
    .expect("failed to initialise REDISPATCH_DEPTH gauge")
});

static METRICS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register every collector declared in this module with the given registry.
///
/// Safe to call multiple times: registration only happens once per process.
pub fn register_metrics(registry: &prometheus::Registry) -> Result<()> {
    if METRICS_REGISTERED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ENQUEUE_COUNT.clone()),
        Box::new(ENQUEUE_ERR.clone()),
        Box::new(OP_DURATION.clone()),
        Box::new(ACK_LEVEL.clone()),
        Box::new(SPLIT_COUNT.clone()),
        Box::new(MERGE_COUNT.clone()),
        Box::new(REDISPATCH_DEPTH.clone()),
    ];
    for collector in collectors {
        registry.register(collector)?;
    }
    Ok(())
}

/// Start a timer for the named operation, returning it alongside the matching error counter.
pub fn observe_op(op: &'static str) -> (Counter, prometheus::HistogramTimer) {
    let err_count = ENQUEUE_ERR.with_label_values(&[op]);
    let timer = OP_DURATION.with_label_values(&[op]).start_timer();
    (err_count, timer)
}

/// Tracer used to annotate persisted-queue and processor spans.
pub static TRACER: Lazy<BoxedTracer> = Lazy::new(|| {
    opentelemetry_api::global::tracer_provider().versioned_tracer(
        env!("CARGO_PKG_NAME"),
        Some(env!("CARGO_PKG_VERSION")),
        Option::<&str>::None,
        None,
    )
});

/// Record the current ack level for a (queue, consumer) pair.
pub fn observe_ack_level(queue: &str, consumer: &str, level: i64) {
    ACK_LEVEL
        .with_label_values(&[queue, consumer])
        .set(level as f64);
}

/// Record the current redispatch buffer depth.
pub fn observe_redispatch_depth(depth: usize) {
    REDISPATCH_DEPTH.set(depth as f64);
}

/// Record that a processing queue split occurred.
pub fn observe_split() {
    SPLIT_COUNT.inc();
}

/// Record that a processing queue merge occurred.
pub fn observe_merge() {
    MERGE_COUNT.inc();
}
