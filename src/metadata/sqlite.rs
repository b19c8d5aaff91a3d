//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{
    now_iso8601, BucketRecord, MetadataError, MetadataStore, MultipartPartRecord,
    MultipartUploadRecord, ObjectRecord, UploadState,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> Result<Self, MetadataError> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> Result<(), MetadataError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent, safe to call on every startup.
    fn init_db(&self) -> Result<(), MetadataError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Buckets
            CREATE TABLE IF NOT EXISTS buckets (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                name       TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- Objects
            CREATE TABLE IF NOT EXISTS objects (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket_id  INTEGER NOT NULL,
                name       TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                etag       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,

                UNIQUE (bucket_id, name),
                FOREIGN KEY (bucket_id) REFERENCES buckets(id) ON DELETE CASCADE
            );

            -- Multipart uploads
            CREATE TABLE IF NOT EXISTS multipart_uploads (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                upload_id   TEXT NOT NULL UNIQUE,
                bucket_id   INTEGER NOT NULL,
                object_name TEXT NOT NULL,
                state       TEXT NOT NULL DEFAULT 'initiated',
                expires_at  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,

                FOREIGN KEY (bucket_id) REFERENCES buckets(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_multipart_uploads_expires_at
                ON multipart_uploads(expires_at);

            -- Multipart parts
            CREATE TABLE IF NOT EXISTS multipart_parts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                upload_id   TEXT NOT NULL,
                part_number INTEGER NOT NULL,
                size_bytes  INTEGER NOT NULL,
                etag        TEXT NOT NULL,
                temp_path   TEXT NOT NULL,
                created_at  TEXT NOT NULL,

                UNIQUE (upload_id, part_number),
                FOREIGN KEY (upload_id) REFERENCES multipart_uploads(upload_id)
                    ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_multipart_parts_upload_id
                ON multipart_parts(upload_id);
            ",
        )
        .map_err(map_sqlite_error)?;

        // Record schema version if not already present.
        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(map_sqlite_error)?
            .flatten();

        if existing.unwrap_or(0) < SCHEMA_VERSION {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_iso8601()],
            )
            .map_err(map_sqlite_error)?;
        }

        Ok(())
    }
}

/// Map rusqlite failures onto the store error taxonomy.  Uniqueness
/// violations surface as `AlreadyExists`.
fn map_sqlite_error(err: rusqlite::Error) -> MetadataError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            MetadataError::AlreadyExists
        }
        other => MetadataError::Backend(other.to_string()),
    }
}

/// Resolve a bucket name to its row id.
fn bucket_id(conn: &Connection, bucket: &str) -> Result<i64, MetadataError> {
    conn.query_row(
        "SELECT id FROM buckets WHERE name = ?1",
        params![bucket],
        |row| row.get(0),
    )
    .optional()
    .map_err(map_sqlite_error)?
    .ok_or(MetadataError::NotFound)
}

fn bucket_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BucketRecord> {
    Ok(BucketRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn object_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectRecord> {
    Ok(ObjectRecord {
        id: row.get(0)?,
        bucket_id: row.get(1)?,
        name: row.get(2)?,
        size_bytes: row.get::<_, i64>(3)? as u64,
        etag: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn upload_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MultipartUploadRecord> {
    let state_text: String = row.get(4)?;
    let state: UploadState = state_text.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown upload state: {state_text}").into(),
        )
    })?;
    Ok(MultipartUploadRecord {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        bucket_id: row.get(2)?,
        object_name: row.get(3)?,
        state,
        expires_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn part_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MultipartPartRecord> {
    Ok(MultipartPartRecord {
        id: row.get(0)?,
        upload_id: row.get(1)?,
        part_number: row.get(2)?,
        size_bytes: row.get::<_, i64>(3)? as u64,
        etag: row.get(4)?,
        temp_path: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const UPLOAD_COLUMNS: &str =
    "id, upload_id, bucket_id, object_name, state, expires_at, created_at, updated_at";

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    // ── Buckets ─────────────────────────────────────────────────────

    fn create_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO buckets (name, created_at) VALUES (?1, ?2)",
                params![name, now_iso8601()],
            )
            .map_err(map_sqlite_error)?;

            conn.query_row(
                "SELECT id, name, created_at FROM buckets WHERE name = ?1",
                params![name],
                bucket_from_row,
            )
            .map_err(map_sqlite_error)
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BucketRecord>, MetadataError>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn
                .prepare("SELECT id, name, created_at FROM buckets ORDER BY name ASC")
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map([], bucket_from_row)
                .map_err(map_sqlite_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
        })
    }

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.query_row(
                "SELECT id, name, created_at FROM buckets WHERE name = ?1",
                params![name],
                bucket_from_row,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .ok_or(MetadataError::NotFound)
        })
    }

    // ── Objects ─────────────────────────────────────────────────────

    fn upsert_object(
        &self,
        bucket: &str,
        name: &str,
        size_bytes: u64,
        etag: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectRecord, MetadataError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let name = name.to_string();
        let etag = etag.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let id = bucket_id(&conn, &bucket)?;
            let now = now_iso8601();
            conn.execute(
                "INSERT INTO objects (bucket_id, name, size_bytes, etag, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (bucket_id, name) DO UPDATE SET
                     size_bytes = excluded.size_bytes,
                     etag = excluded.etag,
                     updated_at = excluded.updated_at",
                params![id, name, size_bytes as i64, etag, now],
            )
            .map_err(map_sqlite_error)?;

            conn.query_row(
                "SELECT id, bucket_id, name, size_bytes, etag, created_at, updated_at
                 FROM objects WHERE bucket_id = ?1 AND name = ?2",
                params![id, name],
                object_from_row,
            )
            .map_err(map_sqlite_error)
        })
    }

    fn get_object(
        &self,
        bucket: &str,
        object: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectRecord, MetadataError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let object = object.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.query_row(
                "SELECT o.id, o.bucket_id, o.name, o.size_bytes, o.etag, o.created_at, o.updated_at
                 FROM objects o JOIN buckets b ON o.bucket_id = b.id
                 WHERE b.name = ?1 AND o.name = ?2",
                params![bucket, object],
                object_from_row,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .ok_or(MetadataError::NotFound)
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectRecord>, MetadataError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT o.id, o.bucket_id, o.name, o.size_bytes, o.etag, o.created_at, o.updated_at
                     FROM objects o JOIN buckets b ON o.bucket_id = b.id
                     WHERE b.name = ?1 AND o.name LIKE ?2 || '%'
                     ORDER BY o.name ASC",
                )
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![bucket, prefix], object_from_row)
                .map_err(map_sqlite_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
        })
    }

    fn delete_object(
        &self,
        bucket: &str,
        object: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let bucket = bucket.to_string();
        let object = object.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let id = bucket_id(&conn, &bucket)?;
            conn.execute(
                "DELETE FROM objects WHERE bucket_id = ?1 AND name = ?2",
                params![id, object],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    // ── Multipart uploads ───────────────────────────────────────────

    fn create_multipart_upload(
        &self,
        bucket: &str,
        upload_id: &str,
        object_name: &str,
        expires_at: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartUploadRecord, MetadataError>> + Send + '_>>
    {
        let bucket = bucket.to_string();
        let upload_id = upload_id.to_string();
        let object_name = object_name.to_string();
        let expires_at = expires_at.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let id = bucket_id(&conn, &bucket)?;
            let now = now_iso8601();
            conn.execute(
                "INSERT INTO multipart_uploads
                     (upload_id, bucket_id, object_name, state, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'initiated', ?4, ?5, ?5)",
                params![upload_id, id, object_name, expires_at, now],
            )
            .map_err(map_sqlite_error)?;

            conn.query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM multipart_uploads WHERE upload_id = ?1"),
                params![upload_id],
                upload_from_row,
            )
            .map_err(map_sqlite_error)
        })
    }

    fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartUploadRecord, MetadataError>> + Send + '_>>
    {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.query_row(
                &format!("SELECT {UPLOAD_COLUMNS} FROM multipart_uploads WHERE upload_id = ?1"),
                params![upload_id],
                upload_from_row,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .ok_or(MetadataError::NotFound)
        })
    }

    fn list_expired_multipart_uploads(
        &self,
        cutoff: &str,
        limit: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MultipartUploadRecord>, MetadataError>> + Send + '_>>
    {
        let cutoff = cutoff.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads
                     WHERE state IN ('initiated', 'uploading') AND expires_at < ?1
                     ORDER BY expires_at ASC
                     LIMIT ?2"
                ))
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![cutoff, limit], upload_from_row)
                .map_err(map_sqlite_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
        })
    }

    fn update_multipart_upload_state(
        &self,
        upload_id: &str,
        state: UploadState,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn
                .execute(
                    "UPDATE multipart_uploads SET state = ?1, updated_at = ?2 WHERE upload_id = ?3",
                    params![state.as_str(), now_iso8601(), upload_id],
                )
                .map_err(map_sqlite_error)?;
            if changed == 0 {
                return Err(MetadataError::NotFound);
            }
            Ok(())
        })
    }

    fn delete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    // ── Multipart parts ─────────────────────────────────────────────

    fn upsert_multipart_part(
        &self,
        upload_id: &str,
        part_number: i64,
        size_bytes: u64,
        etag: &str,
        temp_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartPartRecord, MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        let etag = etag.to_string();
        let temp_path = temp_path.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO multipart_parts
                     (upload_id, part_number, size_bytes, etag, temp_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (upload_id, part_number) DO UPDATE SET
                     size_bytes = excluded.size_bytes,
                     etag = excluded.etag,
                     temp_path = excluded.temp_path",
                params![
                    upload_id,
                    part_number,
                    size_bytes as i64,
                    etag,
                    temp_path,
                    now_iso8601()
                ],
            )
            .map_err(|err| match err {
                // The upsert never hits the UNIQUE constraint, so a
                // constraint failure here is the upload_id foreign key.
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    MetadataError::NotFound
                }
                other => map_sqlite_error(other),
            })?;

            conn.query_row(
                "SELECT id, upload_id, part_number, size_bytes, etag, temp_path, created_at
                 FROM multipart_parts WHERE upload_id = ?1 AND part_number = ?2",
                params![upload_id, part_number],
                part_from_row,
            )
            .map_err(map_sqlite_error)
        })
    }

    fn list_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MultipartPartRecord>, MetadataError>> + Send + '_>>
    {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn
                .prepare(
                    "SELECT id, upload_id, part_number, size_bytes, etag, temp_path, created_at
                     FROM multipart_parts WHERE upload_id = ?1
                     ORDER BY part_number ASC",
                )
                .map_err(map_sqlite_error)?;
            let rows = stmt
                .query_map(params![upload_id], part_from_row)
                .map_err(map_sqlite_error)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_sqlite_error)
        })
    }

    fn delete_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "DELETE FROM multipart_parts WHERE upload_id = ?1",
                params![upload_id],
            )
            .map_err(map_sqlite_error)?;
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::store::iso8601_with_offset_seconds;

    fn test_store() -> SqliteMetadataStore {
        SqliteMetadataStore::new(":memory:").expect("failed to open in-memory store")
    }

    #[tokio::test]
    async fn test_create_bucket_and_duplicate() {
        let store = test_store();
        let bucket = store.create_bucket("demo").await.unwrap();
        assert_eq!(bucket.name, "demo");
        assert!(bucket.id > 0);

        match store.create_bucket("demo").await {
            Err(MetadataError::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_buckets_ordered_by_name() {
        let store = test_store();
        for name in ["zeta", "alpha", "mid"] {
            store.create_bucket(name).await.unwrap();
        }
        let names: Vec<String> = store
            .list_buckets()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_get_bucket_missing() {
        let store = test_store();
        match store.get_bucket("nope").await {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_object_insert_then_update() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();

        let first = store.upsert_object("demo", "obj", 3, "abc").await.unwrap();
        assert_eq!(first.size_bytes, 3);
        assert_eq!(first.etag, "abc");
        assert_eq!(first.created_at, first.updated_at);

        let second = store.upsert_object("demo", "obj", 7, "def").await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.size_bytes, 7);
        assert_eq!(second.etag, "def");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_object_unknown_bucket() {
        let store = test_store();
        match store.upsert_object("nope", "obj", 1, "x").await {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_objects_prefix_and_order() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();
        for name in ["logs-b", "data-1", "logs-a", "other"] {
            store.upsert_object("demo", name, 1, "e").await.unwrap();
        }

        let all: Vec<String> = store
            .list_objects("demo", "")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(all, ["data-1", "logs-a", "logs-b", "other"]);

        let logs: Vec<String> = store
            .list_objects("demo", "logs-")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(logs, ["logs-a", "logs-b"]);
    }

    #[tokio::test]
    async fn test_delete_object_idempotent() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();
        store.upsert_object("demo", "obj", 1, "e").await.unwrap();

        store.delete_object("demo", "obj").await.unwrap();
        // Absent rows still succeed when the bucket exists.
        store.delete_object("demo", "obj").await.unwrap();

        match store.get_object("demo", "obj").await {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multipart_upload_lifecycle() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();

        let expires = iso8601_with_offset_seconds(3600);
        let upload = store
            .create_multipart_upload("demo", "u-1", "big.bin", &expires)
            .await
            .unwrap();
        assert_eq!(upload.state, UploadState::Initiated);
        assert_eq!(upload.object_name, "big.bin");

        store
            .update_multipart_upload_state("u-1", UploadState::Uploading)
            .await
            .unwrap();
        let fetched = store.get_multipart_upload("u-1").await.unwrap();
        assert_eq!(fetched.state, UploadState::Uploading);

        store.delete_multipart_upload("u-1").await.unwrap();
        match store.get_multipart_upload("u-1").await {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_state_unknown_upload() {
        let store = test_store();
        match store
            .update_multipart_upload_state("nope", UploadState::Aborted)
            .await
        {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_part_upsert_is_idempotent_replace() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();
        let expires = iso8601_with_offset_seconds(3600);
        store
            .create_multipart_upload("demo", "u-1", "big.bin", &expires)
            .await
            .unwrap();

        let first = store
            .upsert_multipart_part("u-1", 1, 4, "etag-a", "/tmp/part-1")
            .await
            .unwrap();
        let second = store
            .upsert_multipart_part("u-1", 1, 9, "etag-b", "/tmp/part-1")
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.size_bytes, 9);
        assert_eq!(second.etag, "etag-b");

        let parts = store.list_multipart_parts("u-1").await.unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[tokio::test]
    async fn test_parts_ordered_and_cascade_deleted() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();
        let expires = iso8601_with_offset_seconds(3600);
        store
            .create_multipart_upload("demo", "u-1", "big.bin", &expires)
            .await
            .unwrap();

        for n in [3, 1, 2] {
            store
                .upsert_multipart_part("u-1", n, 1, "e", "/tmp/p")
                .await
                .unwrap();
        }
        let numbers: Vec<i64> = store
            .list_multipart_parts("u-1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.part_number)
            .collect();
        assert_eq!(numbers, [1, 2, 3]);

        // Deleting the upload cascades to parts.
        store.delete_multipart_upload("u-1").await.unwrap();
        assert!(store.list_multipart_parts("u-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_part_upsert_unknown_upload() {
        let store = test_store();
        match store
            .upsert_multipart_part("nope", 1, 1, "e", "/tmp/p")
            .await
        {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_expired_filters_orders_and_limits() {
        let store = test_store();
        store.create_bucket("demo").await.unwrap();

        let old_a = iso8601_with_offset_seconds(-7200);
        let old_b = iso8601_with_offset_seconds(-3600);
        let fresh = iso8601_with_offset_seconds(3600);

        store
            .create_multipart_upload("demo", "u-old-b", "b.bin", &old_b)
            .await
            .unwrap();
        store
            .create_multipart_upload("demo", "u-old-a", "a.bin", &old_a)
            .await
            .unwrap();
        store
            .create_multipart_upload("demo", "u-fresh", "c.bin", &fresh)
            .await
            .unwrap();
        store
            .create_multipart_upload("demo", "u-done", "d.bin", &old_a)
            .await
            .unwrap();
        store
            .update_multipart_upload_state("u-done", UploadState::Completed)
            .await
            .unwrap();

        let cutoff = now_iso8601();
        let expired = store
            .list_expired_multipart_uploads(&cutoff, 10)
            .await
            .unwrap();
        let ids: Vec<String> = expired.into_iter().map(|u| u.upload_id).collect();
        // Oldest first; fresh and terminal uploads excluded.
        assert_eq!(ids, ["u-old-a", "u-old-b"]);

        let limited = store
            .list_expired_multipart_uploads(&cutoff, 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].upload_id, "u-old-a");
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");
        let path_str = path.to_str().unwrap();

        {
            let store = SqliteMetadataStore::new(path_str).unwrap();
            store.create_bucket("demo").await.unwrap();
        }
        // Reopening runs the schema migration again and keeps data.
        let store = SqliteMetadataStore::new(path_str).unwrap();
        let bucket = store.get_bucket("demo").await.unwrap();
        assert_eq!(bucket.name, "demo");
    }
}
