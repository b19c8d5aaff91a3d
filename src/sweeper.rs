//! Periodic reaper for expired multipart uploads.
//!
//! A single timer task wakes every `sweep_interval_seconds`, fetches a
//! bounded batch of uploads whose `expires_at` is more than the grace
//! period in the past, and removes their metadata rows and temp
//! directories.  Sweeps never overlap: the next tick only fires after
//! the previous sweep returns.

use std::sync::Arc;

use metrics::counter;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::CleanupConfig;
use crate::metadata::store::{iso8601_with_offset_seconds, MetadataStore, UploadState};
use crate::metrics::UPLOADS_REAPED_TOTAL;
use crate::storage::local::LocalStorage;

/// Background task that garbage-collects expired multipart uploads.
pub struct Sweeper {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<LocalStorage>,
    config: CleanupConfig,
}

impl Sweeper {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<LocalStorage>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
        }
    }

    /// Spawn the sweep loop as a background task.
    ///
    /// Returns a join handle that can be used to abort the worker.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(&self) {
        let mut timer = interval(Duration::from_secs(self.config.sweep_interval_seconds));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_seconds = self.config.sweep_interval_seconds,
            grace_period_seconds = self.config.grace_period_seconds,
            "cleanup sweeper started"
        );

        // The first tick fires immediately; skip it.
        timer.tick().await;

        loop {
            timer.tick().await;
            match self.sweep_once().await {
                Ok(0) => debug!("cleanup sweep found nothing to reap"),
                Ok(reaped) => info!(reaped, "cleanup sweep reaped expired uploads"),
                Err(message) => error!(%message, "cleanup sweep failed"),
            }
        }
    }

    /// One sweep: reap up to `max_uploads_per_sweep` expired uploads.
    /// Per-upload errors are logged and the sweep moves on; the return
    /// value counts uploads whose metadata rows were removed.
    pub async fn sweep_once(&self) -> Result<u64, String> {
        let cutoff = iso8601_with_offset_seconds(-self.config.grace_period_seconds);
        let expired = self
            .metadata
            .list_expired_multipart_uploads(&cutoff, self.config.max_uploads_per_sweep)
            .await
            .map_err(|e| e.to_string())?;

        let mut reaped = 0u64;
        for upload in expired {
            let upload_id = upload.upload_id.as_str();

            if let Err(e) = self
                .metadata
                .update_multipart_upload_state(upload_id, UploadState::Expired)
                .await
            {
                error!(upload_id, error = %e, "failed to mark upload expired");
                continue;
            }
            if let Err(e) = self.metadata.delete_multipart_parts(upload_id).await {
                error!(upload_id, error = %e, "failed to delete part rows");
                continue;
            }
            if let Err(e) = self.metadata.delete_multipart_upload(upload_id).await {
                error!(upload_id, error = %e, "failed to delete upload row");
                continue;
            }
            if let Err(e) = self.storage.remove_multipart_dir(upload_id).await {
                error!(upload_id, error = %e, "failed to remove upload temp dir");
            }

            debug!(upload_id, "reaped expired upload");
            reaped += 1;
        }

        if reaped > 0 {
            counter!(UPLOADS_REAPED_TOTAL).increment(reaped);
        }
        Ok(reaped)
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::metadata::store::MetadataError;

    fn test_sweeper(grace_period_seconds: i64) -> (tempfile::TempDir, Sweeper) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            LocalStorage::new(dir.path().join("data"), dir.path().join("tmp")).unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let config = CleanupConfig {
            enabled: true,
            sweep_interval_seconds: 60,
            grace_period_seconds,
            max_uploads_per_sweep: 100,
        };
        let sweeper = Sweeper::new(metadata, storage, config);
        (dir, sweeper)
    }

    #[tokio::test]
    async fn test_sweep_reaps_expired_upload_and_temp_dir() {
        let (_dir, sweeper) = test_sweeper(60);
        sweeper.metadata.create_bucket("demo").await.unwrap();
        sweeper
            .metadata
            .create_multipart_upload(
                "demo",
                "u-expired",
                "big.bin",
                &iso8601_with_offset_seconds(-3600),
            )
            .await
            .unwrap();
        sweeper
            .metadata
            .upsert_multipart_part("u-expired", 1, 4, "etag", "/tmp/part-1")
            .await
            .unwrap();

        let part_dir = sweeper.storage.multipart_dir("u-expired");
        tokio::fs::create_dir_all(&part_dir).await.unwrap();
        tokio::fs::write(part_dir.join("part-1"), b"data").await.unwrap();

        let reaped = sweeper.sweep_once().await.unwrap();
        assert_eq!(reaped, 1);

        match sweeper.metadata.get_multipart_upload("u-expired").await {
            Err(MetadataError::NotFound) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(sweeper
            .metadata
            .list_multipart_parts("u-expired")
            .await
            .unwrap()
            .is_empty());
        assert!(!part_dir.exists());
    }

    #[tokio::test]
    async fn test_sweep_spares_uploads_within_grace_period() {
        // Expired ten seconds ago, but the grace period is an hour.
        let (_dir, sweeper) = test_sweeper(3600);
        sweeper.metadata.create_bucket("demo").await.unwrap();
        sweeper
            .metadata
            .create_multipart_upload(
                "demo",
                "u-recent",
                "big.bin",
                &iso8601_with_offset_seconds(-10),
            )
            .await
            .unwrap();

        let reaped = sweeper.sweep_once().await.unwrap();
        assert_eq!(reaped, 0);
        sweeper.metadata.get_multipart_upload("u-recent").await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_respects_batch_limit() {
        let (_dir, mut sweeper) = test_sweeper(0);
        sweeper.config.max_uploads_per_sweep = 2;
        sweeper.metadata.create_bucket("demo").await.unwrap();
        for i in 0..5 {
            sweeper
                .metadata
                .create_multipart_upload(
                    "demo",
                    &format!("u-{i}"),
                    "x.bin",
                    &iso8601_with_offset_seconds(-3600 + i),
                )
                .await
                .unwrap();
        }

        assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    }
}
