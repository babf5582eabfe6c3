mod config;
mod store;
mod score;
mod listing;
mod mirror;
mod store_manager;
mod api;

use std::net::SocketAddr;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::ServerList;
use crate::config::Config;
use crate::mirror::db::MirrorDb;
use crate::store::Store;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dealerd=info"))
        )
        .init();

    tracing::info!("Starting dealerd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/p2pd-dealer/dealerd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let mirror = MirrorDb::open(&config.mirror.db_path)?;
    tracing::info!("Opened mirror at {:?}", config.mirror.db_path);

    // Restore the last mirrored state; everything not retired is re-checked first
    let snapshot = mirror.load_snapshot().context("Failed to load mirrored store")?;
    if snapshot.is_empty() {
        tracing::info!("Mirror is empty, starting with no targets");
    }
    let store = Store::rehydrate(config.dealer.to_settings(), snapshot, Utc::now().timestamp())
        .context("Mirrored store is inconsistent")?;
    let counts = store.counts();
    tracing::info!(
        aliases = counts.aliases,
        services = counts.services,
        imports = counts.imports,
        groups = counts.groups,
        "Rehydrated store"
    );

    let (list_tx, list_rx) = watch::channel(ServerList::default());
    let (hash_tx, hash_rx) = watch::channel(String::new());

    let store_handle = StoreHandle::spawn(store, mirror, list_tx, hash_tx);
    store_handle.refresh().await.context("Failed to build initial server list")?;
    tracing::info!("Initial server list hash: {}", hash_rx.borrow().as_str());

    let cancel = CancellationToken::new();

    let mgr_cancel = cancel.clone();
    let mgr_config = config.mirror.clone();
    let mgr_store = store_handle.clone();
    let mgr_handle = tokio::spawn(async move {
        if let Err(e) = store_manager::run(mgr_store, mgr_config, mgr_cancel).await {
            tracing::error!("Store manager error: {}", e);
        }
    });

    let app_state = api::routes::AppState {
        store: store_handle.clone(),
        list_rx,
        hash_rx,
        monitor_frequency: config.dealer.monitor_frequency_secs,
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Peer addresses gate the mutating endpoints
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(mgr_handle, server_handle);

    if let Err(e) = store_handle.persist().await {
        tracing::error!("Failed to mirror store on shutdown: {:#}", e);
    }

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store thread: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
