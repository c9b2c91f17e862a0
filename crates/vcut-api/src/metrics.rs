//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vcut_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vcut_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vcut_http_requests_in_flight";

    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "vcut_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vcut_jobs_failed_total";

    // Processing metrics
    pub const ENGINE_DURATION_SECONDS: &str = "vcut_engine_duration_seconds";
    pub const FILES_CLEANED_TOTAL: &str = "vcut_files_cleaned_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vcut_rate_limit_hits_total";
}

/// Routes served by the router. Anything else is reported as "unmatched"
/// so scanners can't blow up label cardinality.
const KNOWN_PATHS: &[&str] = &["/", "/health", "/metrics", "/api/test", "/api/process-video"];

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path).to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record job completed.
pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

/// Record job failed in `stage`.
pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record engine wall-clock time.
pub fn record_engine_duration(duration_secs: f64, fast_path: bool) {
    let strategy = if fast_path { "trim" } else { "concat" };
    let labels = [("strategy", strategy.to_string())];
    histogram!(names::ENGINE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record one file removed by retention.
pub fn record_file_cleaned() {
    counter!(names::FILES_CLEANED_TOTAL).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint).to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

fn sanitize_path(path: &str) -> &str {
    let trimmed = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    KNOWN_PATHS
        .iter()
        .find(|known| **known == trimmed)
        .copied()
        .unwrap_or("unmatched")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
