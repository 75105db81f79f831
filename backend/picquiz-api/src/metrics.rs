use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Session store (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Question supply pipeline
    pub static ref WORKFLOW_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "workflow_calls_total",
        "Workflow API calls by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref QUESTIONS_GENERATED_TOTAL: IntCounter = register_int_counter!(
        "questions_generated_total",
        "Candidates produced by the workflow API"
    )
    .unwrap();

    pub static ref QUESTIONS_SAVED_TOTAL: IntCounter = register_int_counter!(
        "questions_saved_total",
        "Candidates persisted as new questions"
    )
    .unwrap();

    pub static ref IMAGES_MIGRATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "images_migrated_total",
        "Image migration attempts by status",
        &["status"]
    )
    .unwrap();

    pub static ref WORKER_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "worker_jobs_total",
        "Background jobs processed by the supply worker",
        &["job", "status"]
    )
    .unwrap();

    pub static ref WORKER_JOBS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "worker_jobs_in_flight",
        "Jobs queued or running in the supply worker"
    )
    .unwrap();

    // Quiz
    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref QUESTIONS_SERVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "questions_served_total",
        "Next-question requests by result",
        &["result"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track session store operation with metrics
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}
