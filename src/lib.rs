//! NebulaFS -- single-node object storage server.
//!
//! This crate provides the core components for running an HTTP object
//! storage service: bucket and object handling, resumable multipart
//! uploads, a SQLite-backed metadata store, JWKS-based bearer-token
//! authentication, and a background sweeper that reaps expired uploads.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod sweeper;

use crate::auth::verifier::JwtVerifier;
use crate::config::Config;
use crate::metadata::store::MetadataStore;
use crate::storage::local::LocalStorage;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Metadata store (SQLite in production, in-memory in tests).
    pub metadata: Arc<dyn MetadataStore>,
    /// Local filesystem object storage.
    pub storage: Arc<LocalStorage>,
    /// Bearer-token verifier backed by the JWKS cache.
    pub verifier: Arc<JwtVerifier>,
}
