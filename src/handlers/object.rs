//! Object API handlers: streaming upload, ranged download, listing,
//! and deletion.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use super::json_response;
use crate::errors::ApiError;
use crate::metadata::store::MetadataError;
use crate::storage::local::{LocalStorage, ObjectWriter, StorageError};
use crate::AppState;

// -- Range parsing ------------------------------------------------------------

/// Parse `Range: bytes=start-end` against a known total size.
///
/// A missing end defaults to `size - 1` and an end past the file is
/// clamped to it; a missing start, a suffix range, multiple ranges, or
/// an unsatisfiable window all yield `None`.
fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_text, end_text) = spec.split_once('-')?;
    if start_text.is_empty() {
        return None;
    }
    let start: u64 = start_text.trim().parse().ok()?;
    let end: u64 = if end_text.is_empty() {
        size.checked_sub(1)?
    } else {
        end_text.trim().parse::<u64>().ok()?.min(size.saturating_sub(1))
    };
    if start > end || start >= size {
        return None;
    }
    Some((start, end))
}

// -- Handlers -----------------------------------------------------------------

#[derive(Debug, serde::Deserialize, Default)]
pub struct ListObjectsQuery {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// `GET /v1/buckets/{bucket}/objects?prefix=p` -- list objects by prefix.
pub async fn list_objects(
    state: &AppState,
    bucket: &str,
    prefix: &str,
) -> Result<Response, ApiError> {
    state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::BucketNotFound,
            other => ApiError::Db(other.to_string()),
        })?;

    let objects = state
        .metadata
        .list_objects(bucket, prefix)
        .await
        .map_err(|e| ApiError::Db(e.to_string()))?;

    let items: Vec<serde_json::Value> = objects
        .iter()
        .map(|o| {
            serde_json::json!({
                "name": o.name,
                "size": o.size_bytes,
                "etag": o.etag,
                "updated_at": o.updated_at,
            })
        })
        .collect();

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "objects": items }),
    ))
}

/// `PUT /v1/buckets/{bucket}/objects/{object}` -- streamed upload.
///
/// The body is written chunk by chunk to a temp file while a SHA-256
/// runs; the atomic rename onto the canonical path is the commit point,
/// after which the metadata row is upserted.
pub async fn put_object(
    state: &AppState,
    bucket: &str,
    object: &str,
    body: Body,
) -> Result<Response, ApiError> {
    if !LocalStorage::is_safe_name(bucket) || !LocalStorage::is_safe_name(object) {
        return Err(ApiError::InvalidName);
    }
    state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::BucketNotFound,
            other => ApiError::Db(other.to_string()),
        })?;
    state.storage.ensure_bucket(bucket).await?;

    let max_body_bytes = state.config.server.limits.max_body_bytes;
    let mut writer = ObjectWriter::create(state.storage.single_temp_path()).await?;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                writer.abort().await;
                return Err(ApiError::Io(format!("failed to read request body: {e}")));
            }
        };
        if writer.size_bytes() + chunk.len() as u64 > max_body_bytes {
            writer.abort().await;
            return Err(ApiError::BodyTooLarge);
        }
        if let Err(e) = writer.write_chunk(&chunk).await {
            writer.abort().await;
            return Err(e.into());
        }
    }

    let written = writer
        .finish(&state.storage.object_path(bucket, object))
        .await?;

    let record = match state
        .metadata
        .upsert_object(bucket, object, written.size_bytes, &written.etag)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            // The rename already happened; drop the file rather than
            // leave an object with no metadata row.
            let _ = tokio::fs::remove_file(&written.path).await;
            return Err(match err {
                MetadataError::NotFound => ApiError::BucketNotFound,
                other => ApiError::Db(other.to_string()),
            });
        }
    };

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "etag": record.etag, "size": record.size_bytes }),
    ))
}

/// `GET /v1/buckets/{bucket}/objects/{object}` -- download, with
/// optional single-range support.
pub async fn get_object(
    state: &AppState,
    bucket: &str,
    object: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    if !LocalStorage::is_safe_name(bucket) || !LocalStorage::is_safe_name(object) {
        return Err(ApiError::InvalidName);
    }
    let file = state
        .storage
        .read_object(bucket, object)
        .await
        .map_err(|err| match err {
            StorageError::NotFound => ApiError::ObjectNotFound,
            other => other.into(),
        })?;
    let size = file.size_bytes;

    let mut handle = tokio::fs::File::open(&file.path).await?;

    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let (start, end) =
            parse_range(range_header, size).ok_or(ApiError::InvalidRange { size })?;
        handle.seek(std::io::SeekFrom::Start(start)).await?;
        let length = end - start + 1;
        let stream = ReaderStream::new(handle.take(length));

        return Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
            .header(header::CONTENT_LENGTH, length)
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::Internal(e.to_string()));
    }

    let stream = ReaderStream::new(handle);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `DELETE /v1/buckets/{bucket}/objects/{object}` -- delete the file,
/// then the metadata row.
pub async fn delete_object(
    state: &AppState,
    bucket: &str,
    object: &str,
) -> Result<Response, ApiError> {
    if !LocalStorage::is_safe_name(bucket) || !LocalStorage::is_safe_name(object) {
        return Err(ApiError::InvalidName);
    }
    state
        .storage
        .delete_object(bucket, object)
        .await
        .map_err(|err| match err {
            StorageError::NotFound => ApiError::ObjectNotFound,
            other => other.into(),
        })?;

    match state.metadata.delete_object(bucket, object).await {
        Ok(()) | Err(MetadataError::NotFound) => {}
        Err(other) => return Err(ApiError::Db(other.to_string())),
    }

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "deleted": true }),
    ))
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_start_end() {
        assert_eq!(parse_range("bytes=0-4", 10), Some((0, 4)));
        assert_eq!(parse_range("bytes=3-9", 10), Some((3, 9)));
        assert_eq!(parse_range(" bytes=0-0 ", 10), Some((0, 0)));
    }

    #[test]
    fn test_parse_range_open_end_defaults_to_last_byte() {
        assert_eq!(parse_range("bytes=4-", 10), Some((4, 9)));
        assert_eq!(parse_range("bytes=0-", 1), Some((0, 0)));
    }

    #[test]
    fn test_parse_range_rejects_missing_start() {
        assert_eq!(parse_range("bytes=-5", 10), None);
        assert_eq!(parse_range("bytes=-", 10), None);
    }

    #[test]
    fn test_parse_range_rejects_unsatisfiable() {
        // start past the end of the object
        assert_eq!(parse_range("bytes=10-12", 10), None);
        // inverted window
        assert_eq!(parse_range("bytes=5-2", 10), None);
        // empty object satisfies nothing
        assert_eq!(parse_range("bytes=0-0", 0), None);
    }

    #[test]
    fn test_parse_range_rejects_other_units_and_multirange() {
        assert_eq!(parse_range("items=0-4", 10), None);
        assert_eq!(parse_range("bytes=0-1,3-4", 10), None);
        assert_eq!(parse_range("bytes=a-b", 10), None);
    }

    #[test]
    fn test_parse_range_end_clamped_to_file_size() {
        assert_eq!(parse_range("bytes=2-100", 10), Some((2, 9)));
    }
}
