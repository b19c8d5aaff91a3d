//! NebulaFS -- single-node object storage server.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use nebulafs::auth::verifier::JwtVerifier;
use nebulafs::config::Config;
use nebulafs::metadata::store::MetadataStore;
use nebulafs::storage::local::LocalStorage;
use nebulafs::sweeper::Sweeper;
use nebulafs::AppState;

/// Command-line arguments for the NebulaFS server.
#[derive(Parser, Debug)]
#[command(name = "nebulafs", version, about = "Single-node object storage server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "nebulafs.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = nebulafs::config::load_config(&cli.config)?;

    // Initialize tracing / logging; RUST_LOG wins over the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.observability.log_level.clone())
            }),
        )
        .init();

    info!("Loaded configuration from {}", cli.config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads)
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    // Initialize Prometheus metrics recorder and register descriptions.
    nebulafs::metrics::init_metrics();
    nebulafs::metrics::describe_metrics();

    // Initialize metadata store (SQLite). Ensure the parent directory
    // exists for the database file.
    if let Some(parent) = std::path::Path::new(&config.metadata.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let metadata_store = nebulafs::metadata::sqlite::SqliteMetadataStore::new(&config.metadata.path)?;
    info!("SQLite metadata store initialized at {}", config.metadata.path);

    let metadata: Arc<dyn MetadataStore> = Arc::new(metadata_store);

    let storage = Arc::new(LocalStorage::new(
        &config.storage.base_path,
        &config.storage.temp_path,
    )?);
    info!(
        "Local storage initialized: base={} temp={}",
        config.storage.base_path, config.storage.temp_path
    );

    let verifier = Arc::new(JwtVerifier::new(config.auth.clone())?);
    if config.auth.enabled {
        info!("Bearer-token auth enabled: issuer={}", config.auth.issuer);
    }

    // Background sweeper for expired multipart uploads.
    if config.cleanup.enabled {
        Sweeper::new(metadata.clone(), storage.clone(), config.cleanup.clone()).spawn();
    } else {
        info!("Cleanup sweeper disabled");
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        metadata,
        storage,
        verifier,
    });
    let app = nebulafs::server::app(state);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    match &config.server.tls {
        Some(tls) => {
            let addr: std::net::SocketAddr = bind_addr.parse()?;
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                &tls.certificate,
                &tls.private_key,
            )
            .await?;

            let handle = axum_server::Handle::new();
            tokio::spawn({
                let handle = handle.clone();
                async move {
                    shutdown_signal().await;
                    handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
                }
            });

            info!("NebulaFS listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            info!("NebulaFS listening on {}", bind_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    info!("NebulaFS shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
