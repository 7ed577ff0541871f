use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use filestore_common::storage::filesystem::FilesystemBlobStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filestore_server::config::AppConfig;
use filestore_server::database::init_db;
use filestore_server::state::AppState;
use filestore_server::store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let db = init_db(&config.database.url)
        .await
        .context("failed to open metadata store")?;
    let blobs = FilesystemBlobStore::new(config.storage.root.clone())
        .await
        .with_context(|| format!("failed to open blob store at {}", config.storage.root.display()))?;
    info!(root = %config.storage.root.display(), "Blob store ready");

    let store = FileStore::new(db, Arc::new(blobs), config.storage.clone());
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(store),
    };
    let app = filestore_server::build_router(state);

    info!("Server running at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
