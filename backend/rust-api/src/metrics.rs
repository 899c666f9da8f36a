use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
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

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Game Metrics
    pub static ref CAPTURE_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "capture_attempts_total",
        "Total number of capture attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref CONTESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "contests_total",
        "Contest lifecycle events",
        &["event"]
    )
    .unwrap();

    pub static ref QUIZ_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_total",
        "Quiz sessions by lifecycle state",
        &["status"]
    )
    .unwrap();

    pub static ref QUIZ_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "quiz_sessions_active",
        "Number of quiz sessions currently held in memory"
    )
    .unwrap();

    pub static ref LOCATION_SUBSCRIPTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "location_subscriptions_active",
        "Number of open location live-update subscriptions"
    )
    .unwrap();

    pub static ref LEADERBOARD_USERS: IntGauge = register_int_gauge!(
        "leaderboard_users",
        "Number of users on the leaderboard"
    )
    .unwrap();

    pub static ref CONTEST_SWEEPER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "contest_sweeper_ticks_total",
        "Total number of contest sweeper ticks",
        &["status"]
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

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_capture(outcome: &str) {
    CAPTURE_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_contest(event: &str) {
    CONTESTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_quiz(status: &str) {
    QUIZ_SESSIONS_TOTAL.with_label_values(&[status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        record_capture("success");
        assert!(CAPTURE_ATTEMPTS_TOTAL.with_label_values(&["success"]).get() >= 1);
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        record_contest("begun");

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("contests_total"));
    }
}
