//! HTTP API handlers.

pub mod bucket;
pub mod health;
pub mod multipart;
pub mod object;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Build an `application/json` response from a serde value.
pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
