use lazy_static::lazy_static;
use prometheus::{GaugeVec, HistogramVec, IntCounterVec, Opts, Registry, exponential_buckets};

lazy_static! {
    pub static ref JOBS_EXECUTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("jobs_executed_total", "jobs executed by terminal status"),
        &["status"]
    )
    .expect("Should succeed to create metric");

    pub static ref JOB_DURATION_MS_METRIC: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "job_duration_ms",
            "Histogram of job execution duration in ms"
        )
        .buckets(exponential_buckets(1.0, 2.0, 14).unwrap()),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref QUEUE_DEPTH_METRIC: GaugeVec = GaugeVec::new(
        Opts::new("queue_depth_metric", "queue_depth_metric"),
        &["queue"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_PUSH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sync_push_total", "sync envelope pushes by outcome"),
        &["remote", "outcome"]
    )
    .expect("Should succeed to create metric");

    pub static ref SYNC_POLL_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sync_poll_total", "sync envelope polls by outcome"),
        &["remote", "outcome"]
    )
    .expect("Should succeed to create metric");

    pub static ref DEAD_LETTER_METRIC: GaugeVec = GaugeVec::new(
        Opts::new("dead_letter_metric", "dead_letter_metric"),
        &["remote"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers the engine's collectors on the crate registry. Callers that
/// expose a /metrics endpoint gather from [`REGISTRY`].
pub fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(JOBS_EXECUTED_TOTAL.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(JOB_DURATION_MS_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(QUEUE_DEPTH_METRIC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(SYNC_PUSH_TOTAL.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(SYNC_POLL_TOTAL.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(DEAD_LETTER_METRIC.clone()))
        .expect("collector can be registered");
}
