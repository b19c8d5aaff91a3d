//! Local filesystem object storage.
//!
//! Published objects live at `<base>/buckets/<bucket>/objects/<object>`.
//! Every write goes to a temp file that is flushed, fsynced, and renamed
//! into place; the rename is the only way an object becomes visible, so
//! readers never observe a partially written file.
//!
//! The temp tree also hosts multipart state:
//! `<temp>/multipart/<upload_id>/part-<n>` for uploaded parts and
//! `<temp>/multipart/<upload_id>/complete-<uuid>` for reassembly.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Chunk size for streamed reads and writes.
pub const IO_BUFFER_SIZE: usize = 8192;

/// Failures surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A bucket or object name violates the naming rules.
    #[error("invalid bucket or object name")]
    InvalidName,

    /// The object file does not exist.
    #[error("object not found")]
    NotFound,

    /// Underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a completed write.
#[derive(Debug, Clone)]
pub struct WrittenObject {
    /// Canonical on-disk path of the published object.
    pub path: PathBuf,
    /// Total bytes written.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the written bytes.
    pub etag: String,
}

/// Handle to a published object file.
#[derive(Debug, Clone)]
pub struct ObjectFile {
    /// Canonical on-disk path.
    pub path: PathBuf,
    /// File length in bytes.
    pub size_bytes: u64,
}

/// Stores objects on the local filesystem under a base/temp directory pair.
pub struct LocalStorage {
    base_path: PathBuf,
    temp_path: PathBuf,
}

impl LocalStorage {
    /// Create a storage rooted at `base_path` with temp files under
    /// `temp_path`.  Both directories are created if missing.
    pub fn new(base_path: impl Into<PathBuf>, temp_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_path = base_path.into();
        let temp_path = temp_path.into();
        std::fs::create_dir_all(&base_path)?;
        std::fs::create_dir_all(&temp_path)?;
        Ok(Self {
            base_path,
            temp_path,
        })
    }

    /// Root directory for published objects.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Root directory for temp files.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Whether `name` is acceptable as a bucket or object name:
    /// non-empty, at most 255 bytes, only `[A-Za-z0-9_.-]`, and not a
    /// path-traversal component.
    pub fn is_safe_name(name: &str) -> bool {
        if name.is_empty() || name.len() > 255 {
            return false;
        }
        if name == "." || name == ".." {
            return false;
        }
        name.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    }

    /// Canonical object path: `<base>/buckets/<bucket>/objects/<object>`.
    pub fn build_object_path(base_path: &Path, bucket: &str, object: &str) -> PathBuf {
        base_path
            .join("buckets")
            .join(bucket)
            .join("objects")
            .join(object)
    }

    /// Canonical path of an object under this storage root.
    pub fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        Self::build_object_path(&self.base_path, bucket, object)
    }

    /// Lazily create `<base>/buckets/<bucket>/objects/`.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if !Self::is_safe_name(bucket) {
            return Err(StorageError::InvalidName);
        }
        let objects_dir = self.base_path.join("buckets").join(bucket).join("objects");
        fs::create_dir_all(&objects_dir).await?;
        Ok(())
    }

    /// Fresh temp path for a single-shot upload: `<temp>/<uuid>`.
    pub fn single_temp_path(&self) -> PathBuf {
        self.temp_path.join(uuid::Uuid::new_v4().to_string())
    }

    /// Temp directory owned by one multipart upload.
    pub fn multipart_dir(&self, upload_id: &str) -> PathBuf {
        self.temp_path.join("multipart").join(upload_id)
    }

    /// On-disk location of one uploaded part.
    pub fn multipart_part_path(&self, upload_id: &str, part_number: i64) -> PathBuf {
        self.multipart_dir(upload_id)
            .join(format!("part-{part_number}"))
    }

    /// Fresh reassembly temp path inside the upload's directory.
    pub fn multipart_complete_path(&self, upload_id: &str) -> PathBuf {
        self.multipart_dir(upload_id)
            .join(format!("complete-{}", uuid::Uuid::new_v4()))
    }

    /// Remove a multipart upload's temp directory.  Missing directories
    /// are fine.
    pub async fn remove_multipart_dir(&self, upload_id: &str) -> std::io::Result<()> {
        let dir = self.multipart_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write a whole object atomically, hashing while writing.
    pub async fn write_object(
        &self,
        bucket: &str,
        object: &str,
        data: &[u8],
    ) -> Result<WrittenObject, StorageError> {
        if !Self::is_safe_name(bucket) || !Self::is_safe_name(object) {
            return Err(StorageError::InvalidName);
        }
        self.ensure_bucket(bucket).await?;

        let mut writer = ObjectWriter::create(self.single_temp_path()).await?;
        for chunk in data.chunks(IO_BUFFER_SIZE) {
            if let Err(e) = writer.write_chunk(chunk).await {
                writer.abort().await;
                return Err(StorageError::Io(e));
            }
        }
        let written = writer.finish(&self.object_path(bucket, object)).await?;
        Ok(written)
    }

    /// Locate a published object.
    pub async fn read_object(&self, bucket: &str, object: &str) -> Result<ObjectFile, StorageError> {
        if !Self::is_safe_name(bucket) || !Self::is_safe_name(object) {
            return Err(StorageError::InvalidName);
        }
        let path = self.object_path(bucket, object);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ObjectFile {
                path,
                size_bytes: meta.len(),
            }),
            Ok(_) => Err(StorageError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Delete a published object; missing objects map to `NotFound`.
    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StorageError> {
        if !Self::is_safe_name(bucket) || !Self::is_safe_name(object) {
            return Err(StorageError::InvalidName);
        }
        let path = self.object_path(bucket, object);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Incremental writer for one object: appends chunks to a temp file while
/// updating a running SHA-256, then publishes with an atomic rename.
pub struct ObjectWriter {
    file: fs::File,
    temp_path: PathBuf,
    hasher: Sha256,
    size_bytes: u64,
}

impl ObjectWriter {
    /// Open a fresh temp file at `temp_path`, creating its parent
    /// directory if needed.
    pub async fn create(temp_path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&temp_path).await?;
        Ok(Self {
            file,
            temp_path,
            hasher: Sha256::new(),
            size_bytes: 0,
        })
    }

    /// Append one chunk to the temp file and the running hash.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size_bytes += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Flush, fsync, and rename onto `final_path`.  The rename is the
    /// commit point; on any error the temp file is removed.
    pub async fn finish(mut self, final_path: &Path) -> std::io::Result<WrittenObject> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&self.temp_path, final_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(e);
        }

        Ok(WrittenObject {
            path: final_path.to_path_buf(),
            size_bytes: self.size_bytes,
            etag: hex::encode(self.hasher.finalize()),
        })
    }

    /// Drop the temp file without publishing.
    pub async fn abort(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let storage = LocalStorage::new(dir.path().join("data"), dir.path().join("tmp"))
            .expect("failed to create storage");
        (dir, storage)
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[test]
    fn test_safe_names() {
        for name in ["demo", "a", "obj.txt", "x-1_2.bin", "A.B-C_d"] {
            assert!(LocalStorage::is_safe_name(name), "{name} should be safe");
        }
        let long = "a".repeat(256);
        for name in ["", ".", "..", "a/b", "x\0y", "a b", "ü", "a:b", long.as_str()] {
            assert!(!LocalStorage::is_safe_name(name), "{name:?} should be unsafe");
        }
        assert!(LocalStorage::is_safe_name(&"a".repeat(255)));
    }

    #[test]
    fn test_build_object_path() {
        let path = LocalStorage::build_object_path(Path::new("/data"), "demo", "readme.txt");
        assert_eq!(path, Path::new("/data/buckets/demo/objects/readme.txt"));
    }

    #[tokio::test]
    async fn test_write_and_read_roundtrip() {
        let (_dir, storage) = test_storage();
        let data = b"hello world";

        let written = storage.write_object("demo", "greeting", data).await.unwrap();
        assert_eq!(written.size_bytes, data.len() as u64);
        assert_eq!(written.etag, sha256_hex(data));

        let file = storage.read_object("demo", "greeting").await.unwrap();
        assert_eq!(file.size_bytes, data.len() as u64);
        assert_eq!(std::fs::read(&file.path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_write_empty_object() {
        let (_dir, storage) = test_storage();
        let written = storage.write_object("demo", "empty", b"").await.unwrap();
        assert_eq!(written.size_bytes, 0);
        assert_eq!(written.etag, sha256_hex(b""));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_dir, storage) = test_storage();
        let first = storage.write_object("demo", "obj", b"version 1").await.unwrap();
        let second = storage.write_object("demo", "obj", b"version 2").await.unwrap();
        assert_ne!(first.etag, second.etag);

        let file = storage.read_object("demo", "obj").await.unwrap();
        assert_eq!(std::fs::read(&file.path).unwrap(), b"version 2");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, storage) = test_storage();
        match storage.read_object("demo", "nope").await {
            Err(StorageError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_and_missing_delete() {
        let (_dir, storage) = test_storage();
        storage.write_object("demo", "obj", b"bytes").await.unwrap();
        storage.delete_object("demo", "obj").await.unwrap();
        match storage.delete_object("demo", "obj").await {
            Err(StorageError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsafe_names_rejected_before_io() {
        let (_dir, storage) = test_storage();
        for (bucket, object) in [("../evil", "obj"), ("demo", "../../etc/passwd")] {
            match storage.write_object(bucket, object, b"x").await {
                Err(StorageError::InvalidName) => {}
                other => panic!("expected InvalidName, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_object_writer_chunked_matches_single_write() {
        let (_dir, storage) = test_storage();
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();

        let mut writer = ObjectWriter::create(storage.single_temp_path()).await.unwrap();
        for chunk in data.chunks(IO_BUFFER_SIZE) {
            writer.write_chunk(chunk).await.unwrap();
        }
        storage.ensure_bucket("demo").await.unwrap();
        let written = writer.finish(&storage.object_path("demo", "big")).await.unwrap();

        assert_eq!(written.size_bytes, data.len() as u64);
        assert_eq!(written.etag, sha256_hex(&data));
        assert_eq!(std::fs::read(&written.path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_object_writer_abort_removes_temp() {
        let (_dir, storage) = test_storage();
        let temp_path = storage.single_temp_path();
        let mut writer = ObjectWriter::create(temp_path.clone()).await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        writer.abort().await;
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_multipart_paths_and_cleanup() {
        let (_dir, storage) = test_storage();
        let part_path = storage.multipart_part_path("upload-1", 3);
        assert!(part_path.ends_with("multipart/upload-1/part-3"));

        tokio::fs::create_dir_all(storage.multipart_dir("upload-1"))
            .await
            .unwrap();
        tokio::fs::write(&part_path, b"part bytes").await.unwrap();
        assert!(part_path.exists());

        storage.remove_multipart_dir("upload-1").await.unwrap();
        assert!(!storage.multipart_dir("upload-1").exists());

        // Removing again is fine.
        storage.remove_multipart_dir("upload-1").await.unwrap();
    }
}
