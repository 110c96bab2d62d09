//! musicvotes-ingress - Event Grid ingestion microservice
//!
//! Receives BlobCreated notifications for uploaded songs, downloads each
//! blob, reads its ID3 tags and stores a votable song record.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use musicvotes_ingress::config::{Args, ServiceConfig};
use musicvotes_ingress::eventgrid::EventCache;
use musicvotes_ingress::services::{HttpBlobFetcher, IngestionCoordinator};
use musicvotes_ingress::{build_router, default_registry, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args).context("Failed to load configuration")?;

    let default_filter = format!(
        "musicvotes_ingress={level},musicvotes_common={level},tower_http={level}",
        level = config.log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting musicvotes-ingress v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    info!("Database: {}", config.database_path.display());
    let db = musicvotes_common::db::init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    tokio::fs::create_dir_all(&config.scratch_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.scratch_dir.display()))?;
    info!("Scratch directory: {}", config.scratch_dir.display());

    let fetcher = HttpBlobFetcher::new(config.fetch_timeout).context("Failed to build HTTP client")?;
    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::new(fetcher),
        config.scratch_dir.clone(),
    ));
    let registry = default_registry(coordinator);
    info!("Handling event types: {:?}", registry.event_types());

    let cache = match config.event_cache_capacity {
        Some(capacity) => {
            info!("Event cache capacity: {}", capacity);
            EventCache::with_capacity(capacity)
        }
        None => EventCache::new(),
    };

    let state = AppState::new(db, Arc::new(cache), registry);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
