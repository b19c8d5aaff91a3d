//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned boxed futures) so it
//! can be held behind `Arc<dyn MetadataStore>` across handlers, the
//! sweeper, and tests.

use chrono::{Duration, SecondsFormat, Utc};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Failures surfaced by metadata backends.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The requested row does not exist.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("already exists")]
    AlreadyExists,

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// Current time as an ISO-8601 string with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO-8601 timestamp `offset_seconds` away from now (negative values
/// go into the past).  All persisted timestamps share this format so
/// they compare lexicographically.
pub fn iso8601_with_offset_seconds(offset_seconds: i64) -> String {
    (Utc::now() + Duration::seconds(offset_seconds)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Record types ───────────────────────────────────────────────────

/// Lifecycle state of a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initiated,
    Uploading,
    Completed,
    Aborted,
    Expired,
}

impl UploadState {
    /// The string persisted in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Initiated => "initiated",
            UploadState::Uploading => "uploading",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
            UploadState::Expired => "expired",
        }
    }

    /// Terminal states reject further part uploads, completion, and abort.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Aborted | UploadState::Expired
        )
    }
}

impl FromStr for UploadState {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(UploadState::Initiated),
            "uploading" => Ok(UploadState::Uploading),
            "completed" => Ok(UploadState::Completed),
            "aborted" => Ok(UploadState::Aborted),
            "expired" => Ok(UploadState::Expired),
            other => Err(MetadataError::Backend(format!("unknown upload state: {other}"))),
        }
    }
}

/// Metadata record for a bucket.
#[derive(Debug, Clone)]
pub struct BucketRecord {
    pub id: i64,
    /// Globally unique bucket name.
    pub name: String,
    pub created_at: String,
}

/// Metadata record for a published object.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub id: i64,
    pub bucket_id: i64,
    /// Object name, unique within its bucket.
    pub name: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the on-disk bytes.
    pub etag: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata record for an in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUploadRecord {
    pub id: i64,
    /// Globally unique upload identifier.
    pub upload_id: String,
    pub bucket_id: i64,
    /// Target object name once the upload completes.
    pub object_name: String,
    pub state: UploadState,
    /// ISO-8601 instant after which the sweeper may reap the upload.
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata record for a single uploaded part.
#[derive(Debug, Clone)]
pub struct MultipartPartRecord {
    pub id: i64,
    pub upload_id: String,
    /// 1-based part number, unique within its upload.
    pub part_number: i64,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the part bytes.
    pub etag: String,
    /// Location of the part's bytes in the temp tree.
    pub temp_path: String,
    pub created_at: String,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract covering bucket, object, multipart,
/// and sweeper queries.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Buckets ─────────────────────────────────────────────────────

    /// Create a bucket; duplicate names yield `AlreadyExists`.
    fn create_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>>;

    /// All buckets ordered by name ascending.
    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BucketRecord>, MetadataError>> + Send + '_>>;

    /// Look up a bucket by name.
    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>>;

    // ── Objects ─────────────────────────────────────────────────────

    /// Insert or update the object row keyed by `(bucket, name)`.
    /// `created_at` is set on insert; `updated_at` always.
    fn upsert_object(
        &self,
        bucket: &str,
        name: &str,
        size_bytes: u64,
        etag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectRecord, MetadataError>> + Send + '_>>;

    /// Look up one object.
    fn get_object(
        &self,
        bucket: &str,
        object: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectRecord, MetadataError>> + Send + '_>>;

    /// Objects whose names start with `prefix`, ordered by name ascending.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectRecord>, MetadataError>> + Send + '_>>;

    /// Delete an object row.  Succeeds even when the row is absent, as
    /// long as the bucket exists.
    fn delete_object(
        &self,
        bucket: &str,
        object: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>>;

    // ── Multipart uploads ───────────────────────────────────────────

    /// Record a new upload in state `initiated`.
    fn create_multipart_upload(
        &self,
        bucket: &str,
        upload_id: &str,
        object_name: &str,
        expires_at: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartUploadRecord, MetadataError>> + Send + '_>>;

    /// Look up an upload by its id.
    fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartUploadRecord, MetadataError>> + Send + '_>>;

    /// Uploads still in `initiated` or `uploading` whose `expires_at`
    /// is before `cutoff`, ordered by `expires_at` ascending, at most
    /// `limit` rows.
    fn list_expired_multipart_uploads(
        &self,
        cutoff: &str,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MultipartUploadRecord>, MetadataError>> + Send + '_>>;

    /// Write a new state and touch `updated_at`.
    fn update_multipart_upload_state(
        &self,
        upload_id: &str,
        state: UploadState,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>>;

    /// Remove the upload row (and, via cascade, its parts).
    fn delete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>>;

    // ── Multipart parts ─────────────────────────────────────────────

    /// Insert or replace the part row keyed by `(upload_id, part_number)`.
    fn upsert_multipart_part(
        &self,
        upload_id: &str,
        part_number: i64,
        size_bytes: u64,
        etag: &str,
        temp_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartPartRecord, MetadataError>> + Send + '_>>;

    /// Parts of an upload ordered by part number ascending.
    fn list_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MultipartPartRecord>, MetadataError>> + Send + '_>>;

    /// Remove all part rows of an upload.
    fn delete_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>>;
}

// -- Tests --------------------------------------------------------------------
