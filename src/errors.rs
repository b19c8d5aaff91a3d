//! API error taxonomy and the JSON error envelope.
//!
//! Every variant maps to a stable error code and HTTP status.  Handlers
//! return `Err(ApiError::...)` and the route layer renders the envelope
//! `{"error":{"code","message","request_id"}}` with the originating
//! request id.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::metadata::store::MetadataError;
use crate::storage::local::StorageError;

/// Generate a UUID-v4 request id.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Errors surfaced through the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A request argument is malformed (bad query parameter, bad part list).
    #[error("{0}")]
    InvalidArgument(String),

    /// The request body is not valid JSON for the endpoint.
    #[error("{0}")]
    InvalidJson(String),

    /// A bucket or object name violates the naming rules.
    #[error("invalid bucket or object name")]
    InvalidName,

    /// The upload alias was called without an object name.
    #[error("missing object name")]
    MissingName,

    /// The part number is not a positive integer.
    #[error("part_number must be a positive integer")]
    InvalidPartNumber,

    /// The Range header cannot be satisfied; carries the total size for
    /// the `Content-Range: bytes */<size>` response header.
    #[error("invalid range")]
    InvalidRange { size: u64 },

    /// Any authentication failure.
    #[error("{0}")]
    Unauthorized(String),

    /// Reserved for future scope checks.
    #[error("forbidden")]
    Forbidden,

    /// The bucket does not exist.
    #[error("bucket not found")]
    BucketNotFound,

    /// The object does not exist.
    #[error("object not found")]
    ObjectNotFound,

    /// The multipart upload does not exist (or belongs to another bucket).
    #[error("multipart upload not found")]
    UploadNotFound,

    /// No route matched the request.
    #[error("route not found")]
    RouteNotFound,

    /// The bucket already exists.
    #[error("bucket exists")]
    AlreadyExists,

    /// The multipart upload is in a state that rejects this operation.
    #[error("{0}")]
    InvalidState(&'static str),

    /// Completion referenced a part that was never uploaded.
    #[error("missing uploaded part {0}")]
    MissingPart(i64),

    /// Completion supplied an etag that does not match the stored part.
    #[error("part etag mismatch for part {0}")]
    EtagMismatch(i64),

    /// The request body exceeds the configured size limit.
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,

    /// Filesystem failure.
    #[error("{0}")]
    Io(String),

    /// Metadata backend failure.
    #[error("{0}")]
    Db(String),

    /// Uncategorized internal error.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Stable error code string used in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::InvalidName => "INVALID_NAME",
            ApiError::MissingName => "MISSING_NAME",
            ApiError::InvalidPartNumber => "INVALID_PART_NUMBER",
            ApiError::InvalidRange { .. } => "INVALID_RANGE",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::BucketNotFound => "BUCKET_NOT_FOUND",
            ApiError::ObjectNotFound => "OBJECT_NOT_FOUND",
            ApiError::UploadNotFound => "UPLOAD_NOT_FOUND",
            ApiError::RouteNotFound => "NOT_FOUND",
            ApiError::AlreadyExists => "ALREADY_EXISTS",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::MissingPart(_) => "MISSING_PART",
            ApiError::EtagMismatch(_) => "ETAG_MISMATCH",
            ApiError::BodyTooLarge => "BODY_TOO_LARGE",
            ApiError::Io(_) => "IO_ERROR",
            ApiError::Db(_) => "DB_ERROR",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_)
            | ApiError::InvalidJson(_)
            | ApiError::InvalidName
            | ApiError::MissingName
            | ApiError::InvalidPartNumber => StatusCode::BAD_REQUEST,
            ApiError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BucketNotFound
            | ApiError::ObjectNotFound
            | ApiError::UploadNotFound
            | ApiError::RouteNotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists
            | ApiError::InvalidState(_)
            | ApiError::MissingPart(_)
            | ApiError::EtagMismatch(_) => StatusCode::CONFLICT,
            ApiError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Io(_) | ApiError::Db(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Render the standard error envelope carrying the originating
    /// request id.
    pub fn into_response_with(self, request_id: &str) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        })
        .to_string();

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response();

        // Unsatisfiable ranges advertise the actual size.
        if let ApiError::InvalidRange { size } = self {
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        if let Ok(value) = request_id.parse() {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound => ApiError::RouteNotFound,
            MetadataError::AlreadyExists => ApiError::AlreadyExists,
            MetadataError::Backend(message) => ApiError::Db(message),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName => ApiError::InvalidName,
            StorageError::NotFound => ApiError::ObjectNotFound,
            StorageError::Io(e) => ApiError::Io(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        assert_eq!(ApiError::InvalidName.code(), "INVALID_NAME");
        assert_eq!(ApiError::InvalidName.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::AlreadyExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InvalidRange { size: 10 }.status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::BodyTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::Db("boom".into()).code(), "DB_ERROR");
    }

    #[test]
    fn test_envelope_carries_request_id() {
        let response = ApiError::BucketNotFound.into_response_with("req-123");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-request-id"], "req-123");
    }

    #[test]
    fn test_invalid_range_sets_content_range() {
        let response = ApiError::InvalidRange { size: 42 }.into_response_with("r");
        assert_eq!(response.headers()["content-range"], "bytes */42");
    }

    #[test]
    fn test_request_id_is_uuid_shaped() {
        let id = generate_request_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }
}
