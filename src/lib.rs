//! Bundle Sync - Webhook-Driven Bundle Inventory Reconciliation
//!
//! This crate keeps bundle products consistent with the components they are
//! assembled from. Order and product webhooks from the commerce platform are
//! deduplicated, turned into per-line quantity deltas, and propagated to
//! component stock and to every affected bundle's stock, price and weight.
//!
//! # Architecture
//!
//! ```text
//! Platform ──webhook──▶ handlers ──▶ Reconciler
//!    ▲                                   │
//!    │                     ┌─────────────┼──────────────┐
//!    │                     ▼             ▼              ▼
//!    │                 dedup gate   order history   bundle graph
//!    │                                   │              │
//!    │                                   ▼              ▼
//!    │                                 delta ──▶ InventoryRecalculator
//!    │                                                  │
//!    └──────── catalog writes (X-Bundle-App-Update) ◀───┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bundle_sync::catalog::HttpCatalogProvider;
//! use bundle_sync::config::ServiceConfig;
//! use bundle_sync::handlers::{app_router, AppState};
//! use bundle_sync::reconcile::Reconciler;
//! use bundle_sync::sqlite::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ServiceConfig::from_env()?);
//!     let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
//!     let reconciler = Reconciler::new(
//!         Arc::new(HttpCatalogProvider::new(config.clone())?),
//!         store.clone(),
//!         store,
//!         config.reconcile.clone(),
//!     );
//!     let app = app_router(Arc::new(reconciler), Arc::new(AppState::new(config.store_count())));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod delta;
pub mod error;
pub mod events;
pub mod handlers;
pub mod history;
pub mod reconcile;
pub mod sqlite;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use bundle::{BundleDefinition, BundleGraph, BundleGraphResolver, InventoryRecalculator};
pub use catalog::{CatalogClient, CatalogProvider, HttpCatalogProvider};
pub use config::{ReconcileSettings, ServiceConfig};
pub use dedup::{InMemoryWebhookStore, WebhookDeduplicator, WebhookStore};
pub use error::{Error, Result};
pub use events::WebhookEvent;
pub use history::{InMemoryOrderHistoryStore, OrderHistoryStore};
pub use reconcile::{Outcome, Reconciler};
pub use sqlite::SqliteStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
