//! Telemetry for the SQLite queue and execution store backend.
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
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;

pub static OP_COUNT: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_queue_sqlite_op_count",
            "Total number of SQLite queue backend operations",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_COUNT counter")
});

pub static OP_ERR: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "queuecore_queue_sqlite_op_error",
            "Number of SQLite queue backend operations that resulted in error",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_ERR counter")
});

pub static OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "queuecore_queue_sqlite_op_duration_seconds",
            "Duration of SQLite queue backend operations",
        ),
        &["op"],
    )
    .expect("failed to initialise OP_DURATION histogram")
});

pub static TRACER: Lazy<BoxedTracer> = Lazy::new(|| {
    opentelemetry_api::global::tracer_provider().versioned_tracer(
        env!("CARGO_PKG_NAME"),
        Some(env!("CARGO_PKG_VERSION")),
        Option::<&str>::None,
        None,
    )
});

static METRICS_REGISTERED: AtomicBool = AtomicBool::new(false);

pub fn register_metrics(registry: &prometheus::Registry) -> Result<()> {
    if METRICS_REGISTERED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(OP_COUNT.clone()),
        Box::new(OP_ERR.clone()),
        Box::new(OP_DURATION.clone()),
    ];
    for collector in collectors {
        registry.register(collector)?;
    }
    Ok(())
}

/// Start a timer for the named operation, returning it alongside the matching error counter.
pub fn observe_op(op: &'static str) -> (Counter, prometheus::HistogramTimer) {
    OP_COUNT.with_label_values(&[op]).inc();
    let err_count = OP_ERR.with_label_values(&[op]);
    let timer = OP_DURATION.with_label_values(&[op]).start_timer();
    (err_count, timer)
}

/// Open a span for the named operation as a child of the current OpenTelemetry context.
pub fn trace_op(op: &'static str) -> OTelContext {
    let span = TRACER.start(op);
    OTelContext::current_with_span(span)
}
