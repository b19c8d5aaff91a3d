//! Multipart upload API handlers.
//!
//! The upload record acts as a state machine: `initiated` ->
//! (`uploading` on first part) -> `completed` | `aborted` | `expired`.
//! Terminal states reject part uploads, completion, and abort with 409.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::warn;

use super::json_response;
use crate::errors::ApiError;
use crate::metadata::store::{
    iso8601_with_offset_seconds, MetadataError, MultipartUploadRecord, UploadState,
};
use crate::storage::local::{LocalStorage, ObjectWriter, IO_BUFFER_SIZE};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct InitiateRequest {
    object: String,
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    #[serde(default)]
    parts: Vec<CompletePart>,
}

#[derive(Debug, Deserialize)]
struct CompletePart {
    #[serde(default)]
    part_number: i64,
    #[serde(default)]
    etag: String,
}

/// Resolve an upload id within a bucket.  A missing bucket, a missing
/// upload, or an upload belonging to another bucket all read as 404.
async fn validate_upload_for_bucket(
    state: &AppState,
    bucket: &str,
    upload_id: &str,
) -> Result<MultipartUploadRecord, ApiError> {
    let bucket = state
        .metadata
        .get_bucket(bucket)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::UploadNotFound,
            other => ApiError::Db(other.to_string()),
        })?;
    let upload = state
        .metadata
        .get_multipart_upload(upload_id)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::UploadNotFound,
            other => ApiError::Db(other.to_string()),
        })?;
    if upload.bucket_id != bucket.id {
        return Err(ApiError::UploadNotFound);
    }
    Ok(upload)
}

/// `POST /v1/buckets/{bucket}/multipart-uploads` -- initiate an upload.
pub async fn initiate(state: &AppState, bucket: &str, body: &[u8]) -> Result<Response, ApiError> {
    if !LocalStorage::is_safe_name(bucket) {
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

    let request: InitiateRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
    if !LocalStorage::is_safe_name(&request.object) {
        return Err(ApiError::InvalidName);
    }

    let upload_id = uuid::Uuid::new_v4().to_string();
    let expires_at =
        iso8601_with_offset_seconds(state.config.storage.multipart.max_upload_ttl_seconds);

    let upload = state
        .metadata
        .create_multipart_upload(bucket, &upload_id, &request.object, &expires_at)
        .await
        .map_err(|e| ApiError::Db(e.to_string()))?;

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "upload_id": upload.upload_id,
            "object": upload.object_name,
            "expires_at": upload.expires_at,
        }),
    ))
}

/// `PUT /v1/buckets/{bucket}/multipart-uploads/{upload_id}/parts/{n}` --
/// persist one part.  Re-uploading a part number replaces its bytes and
/// etag.
pub async fn upload_part(
    state: &AppState,
    bucket: &str,
    upload_id: &str,
    part_number_text: &str,
    body: Body,
) -> Result<Response, ApiError> {
    let part_number: i64 = match part_number_text.parse() {
        Ok(n) if n > 0 => n,
        _ => return Err(ApiError::InvalidPartNumber),
    };

    let upload = validate_upload_for_bucket(state, bucket, upload_id).await?;
    if upload.state.is_terminal() {
        return Err(ApiError::InvalidState("upload is not writable"));
    }

    let max_body_bytes = state.config.server.limits.max_body_bytes as usize;
    let data = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|_| ApiError::BodyTooLarge)?;

    let part_path = state.storage.multipart_part_path(upload_id, part_number);
    if let Some(parent) = part_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&part_path, &data).await?;
    let etag = hex::encode(Sha256::digest(&data));

    let part = state
        .metadata
        .upsert_multipart_part(
            upload_id,
            part_number,
            data.len() as u64,
            &etag,
            &part_path.to_string_lossy(),
        )
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::UploadNotFound,
            other => ApiError::Db(other.to_string()),
        })?;

    state
        .metadata
        .update_multipart_upload_state(upload_id, UploadState::Uploading)
        .await
        .map_err(|err| match err {
            MetadataError::NotFound => ApiError::UploadNotFound,
            other => ApiError::Db(other.to_string()),
        })?;

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "upload_id": upload_id,
            "part_number": part.part_number,
            "etag": part.etag,
            "size": part.size_bytes,
        }),
    ))
}

/// `GET /v1/buckets/{bucket}/multipart-uploads/{upload_id}/parts` --
/// upload status plus parts ordered by part number.
pub async fn list_parts(
    state: &AppState,
    bucket: &str,
    upload_id: &str,
) -> Result<Response, ApiError> {
    let upload = validate_upload_for_bucket(state, bucket, upload_id).await?;

    let parts = state
        .metadata
        .list_multipart_parts(upload_id)
        .await
        .map_err(|e| ApiError::Db(e.to_string()))?;

    let items: Vec<serde_json::Value> = parts
        .iter()
        .map(|p| {
            serde_json::json!({
                "part_number": p.part_number,
                "size": p.size_bytes,
                "etag": p.etag,
            })
        })
        .collect();

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "upload_id": upload_id,
            "object": upload.object_name,
            "state": upload.state.as_str(),
            "parts": items,
        }),
    ))
}

/// Validate the client-supplied completion list: non-empty, positive
/// part numbers with etags, strictly ascending.
fn validate_complete_parts(body: &[u8]) -> Result<Vec<CompletePart>, ApiError> {
    let request: CompleteRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))?;
    if request.parts.is_empty() {
        return Err(ApiError::InvalidJson("parts list is required".to_string()));
    }
    let mut previous = 0;
    for part in &request.parts {
        if part.part_number <= 0 || part.etag.is_empty() {
            return Err(ApiError::InvalidJson(
                "invalid part_number or etag".to_string(),
            ));
        }
        if part.part_number <= previous {
            return Err(ApiError::InvalidJson(
                "parts must be strictly increasing".to_string(),
            ));
        }
        previous = part.part_number;
    }
    Ok(request.parts)
}

/// `POST /v1/buckets/{bucket}/multipart-uploads/{upload_id}/complete` --
/// verify the part list, reassemble in ascending order, and publish.
///
/// The final rename is the commit point: any failure before it leaves
/// the object absent and the call retriable.
pub async fn complete(
    state: &AppState,
    bucket: &str,
    upload_id: &str,
    body: &[u8],
) -> Result<Response, ApiError> {
    let upload = validate_upload_for_bucket(state, bucket, upload_id).await?;
    if upload.state.is_terminal() {
        return Err(ApiError::InvalidState("upload is not completable"));
    }

    let expected_parts = validate_complete_parts(body)?;

    let stored_parts = state
        .metadata
        .list_multipart_parts(upload_id)
        .await
        .map_err(|e| ApiError::Db(e.to_string()))?;
    if stored_parts.is_empty() {
        return Err(ApiError::InvalidState("no parts uploaded"));
    }
    let part_map: std::collections::HashMap<i64, _> = stored_parts
        .into_iter()
        .map(|p| (p.part_number, p))
        .collect();

    let mut writer =
        ObjectWriter::create(state.storage.multipart_complete_path(upload_id)).await?;
    let mut buffer = vec![0u8; IO_BUFFER_SIZE];

    for expected in &expected_parts {
        let stored = match part_map.get(&expected.part_number) {
            Some(stored) => stored,
            None => {
                writer.abort().await;
                return Err(ApiError::MissingPart(expected.part_number));
            }
        };
        if stored.etag != expected.etag {
            writer.abort().await;
            return Err(ApiError::EtagMismatch(expected.part_number));
        }

        let mut part_file = match tokio::fs::File::open(&stored.temp_path).await {
            Ok(file) => file,
            Err(e) => {
                writer.abort().await;
                return Err(ApiError::Io(format!("failed to read uploaded part: {e}")));
            }
        };
        loop {
            let read = match part_file.read(&mut buffer).await {
                Ok(read) => read,
                Err(e) => {
                    writer.abort().await;
                    return Err(ApiError::Io(format!("failed to read uploaded part: {e}")));
                }
            };
            if read == 0 {
                break;
            }
            if let Err(e) = writer.write_chunk(&buffer[..read]).await {
                writer.abort().await;
                return Err(e.into());
            }
        }
    }

    let written = writer
        .finish(&state.storage.object_path(bucket, &upload.object_name))
        .await?;

    let record = match state
        .metadata
        .upsert_object(bucket, &upload.object_name, written.size_bytes, &written.etag)
        .await
    {
        Ok(record) => record,
        Err(err) => {
            let _ = tokio::fs::remove_file(&written.path).await;
            return Err(match err {
                MetadataError::NotFound => ApiError::BucketNotFound,
                other => ApiError::Db(other.to_string()),
            });
        }
    };

    // The object is published; remaining bookkeeping is best-effort and
    // the sweeper cannot resurrect it (the upload row is going away).
    if let Err(e) = state
        .metadata
        .update_multipart_upload_state(upload_id, UploadState::Completed)
        .await
    {
        warn!(upload_id, error = %e, "failed to mark upload completed");
    }
    if let Err(e) = state.metadata.delete_multipart_parts(upload_id).await {
        warn!(upload_id, error = %e, "failed to delete part rows");
    }
    if let Err(e) = state.metadata.delete_multipart_upload(upload_id).await {
        warn!(upload_id, error = %e, "failed to delete upload row");
    }
    if let Err(e) = state.storage.remove_multipart_dir(upload_id).await {
        warn!(upload_id, error = %e, "failed to remove upload temp dir");
    }

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "name": record.name,
            "etag": record.etag,
            "size": record.size_bytes,
        }),
    ))
}

/// `DELETE /v1/buckets/{bucket}/multipart-uploads/{upload_id}` -- abort.
pub async fn abort(state: &AppState, bucket: &str, upload_id: &str) -> Result<Response, ApiError> {
    let upload = validate_upload_for_bucket(state, bucket, upload_id).await?;
    if upload.state.is_terminal() {
        return Err(ApiError::InvalidState("upload is not abortable"));
    }

    if let Err(e) = state
        .metadata
        .update_multipart_upload_state(upload_id, UploadState::Aborted)
        .await
    {
        warn!(upload_id, error = %e, "failed to mark upload aborted");
    }
    if let Err(e) = state.metadata.delete_multipart_parts(upload_id).await {
        warn!(upload_id, error = %e, "failed to delete part rows");
    }
    if let Err(e) = state.metadata.delete_multipart_upload(upload_id).await {
        warn!(upload_id, error = %e, "failed to delete upload row");
    }
    if let Err(e) = state.storage.remove_multipart_dir(upload_id).await {
        warn!(upload_id, error = %e, "failed to remove upload temp dir");
    }

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("static response"))
}

// -- Tests --------------------------------------------------------------------
