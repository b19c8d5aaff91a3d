//! Expiry sweeper integration tests over the SQLite store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tower::ServiceExt;

use nebulafs::auth::verifier::JwtVerifier;
use nebulafs::config::{CleanupConfig, Config};
use nebulafs::metadata::sqlite::SqliteMetadataStore;
use nebulafs::metadata::store::{iso8601_with_offset_seconds, MetadataError, MetadataStore};
use nebulafs::server::app;
use nebulafs::storage::local::LocalStorage;
use nebulafs::sweeper::Sweeper;
use nebulafs::AppState;

struct Fixture {
    _dir: TempDir,
    state: Arc<AppState>,
    sweeper: Sweeper,
}

fn fixture(grace_period_seconds: i64) -> Fixture {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage.base_path = dir.path().join("data").display().to_string();
    config.storage.temp_path = dir.path().join("tmp").display().to_string();
    config.cleanup = CleanupConfig {
        enabled: true,
        sweep_interval_seconds: 60,
        grace_period_seconds,
        max_uploads_per_sweep: 100,
    };

    let metadata: Arc<dyn MetadataStore> =
        Arc::new(SqliteMetadataStore::new(":memory:").unwrap());
    let storage = Arc::new(
        LocalStorage::new(&config.storage.base_path, &config.storage.temp_path).unwrap(),
    );
    let verifier = Arc::new(JwtVerifier::new(config.auth.clone()).unwrap());

    let sweeper = Sweeper::new(metadata.clone(), storage.clone(), config.cleanup.clone());
    let state = Arc::new(AppState {
        config,
        metadata,
        storage,
        verifier,
    });
    Fixture {
        _dir: dir,
        state,
        sweeper,
    }
}

/// Seed an upload directly in the metadata store with a chosen expiry,
/// plus a part file in the temp tree.
async fn seed_upload(state: &AppState, upload_id: &str, expires_at: &str) {
    state
        .metadata
        .create_multipart_upload("demo", upload_id, "big.bin", expires_at)
        .await
        .unwrap();
    let part_path = state.storage.multipart_part_path(upload_id, 1);
    tokio::fs::create_dir_all(part_path.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&part_path, b"stale part bytes").await.unwrap();
    state
        .metadata
        .upsert_multipart_part(upload_id, 1, 16, "etag", &part_path.to_string_lossy())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sweep_reaps_long_expired_upload() {
    let fixture = fixture(60);
    let state = &fixture.state;
    state.metadata.create_bucket("demo").await.unwrap();

    // Expired an hour ago with a one-minute grace period.
    seed_upload(state, "u-stale", &iso8601_with_offset_seconds(-3600)).await;

    let reaped = fixture.sweeper.sweep_once().await.unwrap();
    assert_eq!(reaped, 1);

    match state.metadata.get_multipart_upload("u-stale").await {
        Err(MetadataError::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(state
        .metadata
        .list_multipart_parts("u-stale")
        .await
        .unwrap()
        .is_empty());
    assert!(!state.storage.multipart_dir("u-stale").exists());

    // The API agrees the upload is gone.
    let router = app(state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/buckets/demo/multipart-uploads/u-stale/parts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sweep_leaves_live_uploads_alone() {
    let fixture = fixture(60);
    let state = &fixture.state;
    state.metadata.create_bucket("demo").await.unwrap();

    seed_upload(state, "u-live", &iso8601_with_offset_seconds(3600)).await;
    seed_upload(state, "u-in-grace", &iso8601_with_offset_seconds(-10)).await;

    let reaped = fixture.sweeper.sweep_once().await.unwrap();
    assert_eq!(reaped, 0);

    state.metadata.get_multipart_upload("u-live").await.unwrap();
    state
        .metadata
        .get_multipart_upload("u-in-grace")
        .await
        .unwrap();
    assert!(state.storage.multipart_dir("u-live").exists());
}

#[tokio::test]
async fn test_sweep_continues_past_missing_temp_dirs() {
    let fixture = fixture(0);
    let state = &fixture.state;
    state.metadata.create_bucket("demo").await.unwrap();

    // One upload with no temp directory at all; removal is a no-op and
    // the sweep still reaps both.
    state
        .metadata
        .create_multipart_upload("demo", "u-no-dir", "a.bin", &iso8601_with_offset_seconds(-120))
        .await
        .unwrap();
    seed_upload(state, "u-with-dir", &iso8601_with_offset_seconds(-60)).await;

    let reaped = fixture.sweeper.sweep_once().await.unwrap();
    assert_eq!(reaped, 2);
}
