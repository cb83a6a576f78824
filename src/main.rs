//! Bundle Sync server
//!
//! Serves the webhook and status endpoints, persists dedup records and order
//! history in SQLite, and runs the expired-record sweep.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bundle_sync::catalog::HttpCatalogProvider;
use bundle_sync::config::ServiceConfig;
use bundle_sync::dedup::{spawn_sweeper, WebhookStore};
use bundle_sync::handlers::{app_router, AppState};
use bundle_sync::reconcile::Reconciler;
use bundle_sync::sqlite::SqliteStore;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Bundle Sync server
#[derive(Parser, Debug)]
#[command(name = "bundle-sync")]
#[command(version)]
#[command(about = "Webhook-driven inventory reconciliation for bundle products")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(ServiceConfig::from_env().context("invalid configuration")?);
    tracing::debug!(?config, "Effective configuration");

    let provider = HttpCatalogProvider::new(config.clone()).context("failed to build HTTP client")?;
    let store = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .context("failed to open database")?,
    );
    let webhooks: Arc<dyn WebhookStore> = store.clone();
    let sweeper = spawn_sweeper(webhooks.clone(), config.sweep_interval);

    let reconciler = Reconciler::new(
        Arc::new(provider),
        webhooks,
        store.clone(),
        config.reconcile.clone(),
    );
    let app = app_router(
        Arc::new(reconciler),
        Arc::new(AppState::new(config.store_count())),
    )
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        "Bundle Sync v{} listening on {}",
        bundle_sync::VERSION,
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    store.close().await;
    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
