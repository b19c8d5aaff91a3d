//! Prometheus metrics for NebulaFS.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the request-level middleware,
//! and exposes the `/metrics` endpoint handler.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "nebulafs_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "nebulafs_http_request_duration_seconds";

/// Multipart uploads reaped by the expiry sweeper (counter).
pub const UPLOADS_REAPED_TOTAL: &str = "nebulafs_uploads_reaped_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to
/// call multiple times (e.g. in tests). Returns the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        UPLOADS_REAPED_TOTAL,
        "Expired multipart uploads reaped by the sweeper"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records request counts and latency.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// This prevents high-cardinality labels from unique bucket/object names.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => "/".to_string(),
        ["healthz"] | ["readyz"] | ["metrics"] => path.to_string(),
        ["v1", "buckets"] => "/v1/buckets".to_string(),
        ["v1", "buckets", _] => "/v1/buckets/{bucket}".to_string(),
        ["v1", "buckets", _, "objects"] => "/v1/buckets/{bucket}/objects".to_string(),
        ["v1", "buckets", _, "objects", _] => {
            "/v1/buckets/{bucket}/objects/{object}".to_string()
        }
        ["v1", "buckets", _, "multipart-uploads"] => {
            "/v1/buckets/{bucket}/multipart-uploads".to_string()
        }
        ["v1", "buckets", _, "multipart-uploads", _] => {
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}".to_string()
        }
        ["v1", "buckets", _, "multipart-uploads", _, "parts"] => {
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}/parts".to_string()
        }
        ["v1", "buckets", _, "multipart-uploads", _, "parts", _] => {
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}/parts/{part_number}".to_string()
        }
        ["v1", "buckets", _, "multipart-uploads", _, "complete"] => {
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}/complete".to_string()
        }
        _ => "/other".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let handle = init_metrics();
    let body = handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_infrastructure_paths() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/healthz"), "/healthz");
        assert_eq!(normalize_path("/readyz"), "/readyz");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_bucket_and_object_paths() {
        assert_eq!(normalize_path("/v1/buckets"), "/v1/buckets");
        assert_eq!(
            normalize_path("/v1/buckets/demo/objects"),
            "/v1/buckets/{bucket}/objects"
        );
        assert_eq!(
            normalize_path("/v1/buckets/demo/objects/readme.txt"),
            "/v1/buckets/{bucket}/objects/{object}"
        );
    }

    #[test]
    fn test_normalize_multipart_paths() {
        assert_eq!(
            normalize_path("/v1/buckets/demo/multipart-uploads"),
            "/v1/buckets/{bucket}/multipart-uploads"
        );
        assert_eq!(
            normalize_path("/v1/buckets/demo/multipart-uploads/u-1/parts/4"),
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}/parts/{part_number}"
        );
        assert_eq!(
            normalize_path("/v1/buckets/demo/multipart-uploads/u-1/complete"),
            "/v1/buckets/{bucket}/multipart-uploads/{upload_id}/complete"
        );
    }

    #[test]
    fn test_normalize_unknown_paths_collapse() {
        assert_eq!(normalize_path("/totally/unknown/route"), "/other");
    }
}
