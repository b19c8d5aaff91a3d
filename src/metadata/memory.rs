//! In-memory metadata store.
//!
//! Mirrors the SQLite store's semantics (uniqueness, ordering, cascade
//! deletes) over plain hash maps.  Used by tests that do not want a
//! database file.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::store::{
    now_iso8601, BucketRecord, MetadataError, MetadataStore, MultipartPartRecord,
    MultipartUploadRecord, ObjectRecord, UploadState,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    /// name -> bucket
    buckets: HashMap<String, BucketRecord>,
    /// (bucket_id, name) -> object
    objects: HashMap<(i64, String), ObjectRecord>,
    /// upload_id -> upload
    uploads: HashMap<String, MultipartUploadRecord>,
    /// (upload_id, part_number) -> part
    parts: HashMap<(String, i64), MultipartPartRecord>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn bucket_id(&self, name: &str) -> Result<i64, MetadataError> {
        self.buckets
            .get(name)
            .map(|b| b.id)
            .ok_or(MetadataError::NotFound)
    }
}

/// Metadata store that lives entirely in process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            if inner.buckets.contains_key(&name) {
                return Err(MetadataError::AlreadyExists);
            }
            let record = BucketRecord {
                id: inner.next_id(),
                name: name.clone(),
                created_at: now_iso8601(),
            };
            inner.buckets.insert(name, record.clone());
            Ok(record)
        })
    }

    fn list_buckets(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BucketRecord>, MetadataError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            let mut buckets: Vec<BucketRecord> = inner.buckets.values().cloned().collect();
            buckets.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(buckets)
        })
    }

    fn get_bucket(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<BucketRecord, MetadataError>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            inner
                .buckets
                .get(&name)
                .cloned()
                .ok_or(MetadataError::NotFound)
        })
    }

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
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let bucket_id = inner.bucket_id(&bucket)?;
            let now = now_iso8601();
            let key = (bucket_id, name.clone());
            let record = match inner.objects.get(&key) {
                Some(existing) => ObjectRecord {
                    size_bytes,
                    etag,
                    updated_at: now,
                    ..existing.clone()
                },
                None => ObjectRecord {
                    id: inner.next_id(),
                    bucket_id,
                    name,
                    size_bytes,
                    etag,
                    created_at: now.clone(),
                    updated_at: now,
                },
            };
            inner.objects.insert(key, record.clone());
            Ok(record)
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
            let inner = self.inner.lock().expect("mutex poisoned");
            let bucket_id = inner.bucket_id(&bucket)?;
            inner
                .objects
                .get(&(bucket_id, object))
                .cloned()
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
            let inner = self.inner.lock().expect("mutex poisoned");
            let bucket_id = inner.bucket_id(&bucket)?;
            let mut objects: Vec<ObjectRecord> = inner
                .objects
                .values()
                .filter(|o| o.bucket_id == bucket_id && o.name.starts_with(&prefix))
                .cloned()
                .collect();
            objects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(objects)
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
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let bucket_id = inner.bucket_id(&bucket)?;
            inner.objects.remove(&(bucket_id, object));
            Ok(())
        })
    }

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
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let bucket_id = inner.bucket_id(&bucket)?;
            if inner.uploads.contains_key(&upload_id) {
                return Err(MetadataError::AlreadyExists);
            }
            let now = now_iso8601();
            let record = MultipartUploadRecord {
                id: inner.next_id(),
                upload_id: upload_id.clone(),
                bucket_id,
                object_name,
                state: UploadState::Initiated,
                expires_at,
                created_at: now.clone(),
                updated_at: now,
            };
            inner.uploads.insert(upload_id, record.clone());
            Ok(record)
        })
    }

    fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MultipartUploadRecord, MetadataError>> + Send + '_>>
    {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            inner
                .uploads
                .get(&upload_id)
                .cloned()
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
            let inner = self.inner.lock().expect("mutex poisoned");
            let mut expired: Vec<MultipartUploadRecord> = inner
                .uploads
                .values()
                .filter(|u| {
                    matches!(u.state, UploadState::Initiated | UploadState::Uploading)
                        && u.expires_at.as_str() < cutoff.as_str()
                })
                .cloned()
                .collect();
            expired.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
            expired.truncate(limit.max(0) as usize);
            Ok(expired)
        })
    }

    fn update_multipart_upload_state(
        &self,
        upload_id: &str,
        state: UploadState,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            let upload = inner
                .uploads
                .get_mut(&upload_id)
                .ok_or(MetadataError::NotFound)?;
            upload.state = state;
            upload.updated_at = now_iso8601();
            Ok(())
        })
    }

    fn delete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            inner.uploads.remove(&upload_id);
            // Cascade, matching the SQLite foreign key.
            inner.parts.retain(|(id, _), _| *id != upload_id);
            Ok(())
        })
    }

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
            let mut inner = self.inner.lock().expect("mutex poisoned");
            if !inner.uploads.contains_key(&upload_id) {
                return Err(MetadataError::NotFound);
            }
            let key = (upload_id.clone(), part_number);
            let record = match inner.parts.get(&key) {
                Some(existing) => MultipartPartRecord {
                    size_bytes,
                    etag,
                    temp_path,
                    ..existing.clone()
                },
                None => MultipartPartRecord {
                    id: inner.next_id(),
                    upload_id,
                    part_number,
                    size_bytes,
                    etag,
                    temp_path,
                    created_at: now_iso8601(),
                },
            };
            inner.parts.insert(key, record.clone());
            Ok(record)
        })
    }

    fn list_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MultipartPartRecord>, MetadataError>> + Send + '_>>
    {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let inner = self.inner.lock().expect("mutex poisoned");
            let mut parts: Vec<MultipartPartRecord> = inner
                .parts
                .values()
                .filter(|p| p.upload_id == upload_id)
                .cloned()
                .collect();
            parts.sort_by_key(|p| p.part_number);
            Ok(parts)
        })
    }

    fn delete_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), MetadataError>> + Send + '_>> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("mutex poisoned");
            inner.parts.retain(|(id, _), _| *id != upload_id);
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
