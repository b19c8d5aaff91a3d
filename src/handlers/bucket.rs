//! Bucket API handlers.

use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use super::json_response;
use crate::errors::ApiError;
use crate::metadata::store::MetadataError;
use crate::storage::local::LocalStorage;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct CreateBucketRequest {
    name: String,
}

/// `POST /v1/buckets` -- create a bucket.
pub async fn create_bucket(state: &AppState, body: &[u8]) -> Result<Response, ApiError> {
    let request: CreateBucketRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))?;

    if !LocalStorage::is_safe_name(&request.name) {
        return Err(ApiError::InvalidName);
    }

    let bucket = state
        .metadata
        .create_bucket(&request.name)
        .await
        .map_err(|err| match err {
            MetadataError::AlreadyExists => ApiError::AlreadyExists,
            other => ApiError::Db(other.to_string()),
        })?;

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "name": bucket.name }),
    ))
}

/// `GET /v1/buckets` -- list all buckets ordered by name.
pub async fn list_buckets(state: &AppState) -> Result<Response, ApiError> {
    let buckets = state
        .metadata
        .list_buckets()
        .await
        .map_err(|e| ApiError::Db(e.to_string()))?;

    let items: Vec<serde_json::Value> = buckets
        .iter()
        .map(|b| serde_json::json!({ "name": b.name, "created_at": b.created_at }))
        .collect();

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "buckets": items }),
    ))
}
