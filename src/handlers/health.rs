//! Liveness and readiness probes.

use axum::http::StatusCode;
use axum::response::Response;

use super::json_response;

/// `GET /healthz`
pub fn healthz(request_id: &str) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": "ok", "request_id": request_id }),
    )
}

/// `GET /readyz`
pub fn readyz(request_id: &str) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": "ready", "request_id": request_id }),
    )
}
