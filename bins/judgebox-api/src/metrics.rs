// Prometheus metrics for the Judgebox API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Submissions accepted (counter with language label)
    pub static ref SUBMISSIONS: CounterVec = CounterVec::new(
        Opts::new("judgebox_submissions_total", "Total number of submissions queued"),
        &["language"]
    )
    .expect("metric can be created");

    // Submissions rejected (unsupported language, queue down)
    pub static ref SUBMISSIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("judgebox_submissions_rejected_total", "Total submissions rejected"),
        &["reason"]
    )
    .expect("metric can be created");

    // Terminal statuses reported by workers
    pub static ref SUBMISSIONS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("judgebox_submissions_completed_total", "Total submissions that reached a terminal status"),
        &["language", "status"]
    )
    .expect("metric can be created");

    // Execution time histogram (in milliseconds)
    pub static ref EXECUTION_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "judgebox_execution_time_ms",
            "Execution time in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0]),
        &["language"]
    )
    .expect("metric can be created");

    // Jobs waiting in the queue
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "judgebox_queue_depth", "Current number of queued jobs"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SUBMISSIONS.clone()))?;
    REGISTRY.register(Box::new(SUBMISSIONS_REJECTED.clone()))?;
    REGISTRY.register(Box::new(SUBMISSIONS_COMPLETED.clone()))?;
    REGISTRY.register(Box::new(EXECUTION_TIME.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    Ok(())
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_submission(language: &str) {
    SUBMISSIONS.with_label_values(&[language]).inc();
}

pub fn record_rejection(reason: &str) {
    SUBMISSIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_completion(language: &str, status: &str, execution_time_ms: Option<u64>) {
    SUBMISSIONS_COMPLETED.with_label_values(&[language, status]).inc();
    if let Some(ms) = execution_time_ms {
        EXECUTION_TIME.with_label_values(&[language]).observe(ms as f64);
    }
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}
