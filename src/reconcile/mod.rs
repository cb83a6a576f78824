//! Reconciliation orchestration
//!
//! [`Reconciler`] owns the dedup gate, the order history and the per-store
//! catalog lookup, and drives one of two pipelines per delivery:
//!
//! ```text
//! RECEIVED → credential lookup ──(none)──▶ 401
//!          → DEDUP_CHECKED ──(duplicate)──▶ 200
//!          → order pipeline / product pipeline
//!          → DONE (200) | catalog unreadable: key released, 500
//! ```

pub mod aggregate;
pub mod lifecycle;
pub mod locks;
pub mod order;
pub mod product;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::catalog::{CatalogClient, CatalogProvider};
use crate::config::ReconcileSettings;
use crate::dedup::{WebhookDeduplicator, WebhookStore};
use crate::error::WebhookError;
use crate::events::{WebhookEvent, WebhookScope};
use crate::history::OrderHistoryStore;

pub use aggregate::InventoryAdjustments;
pub use lifecycle::{classify, OrderLifecycle};
pub use locks::OrderLocks;
pub use order::{plan_deltas, DeltaPlan};

use order::OrderPipeline;
use product::ProductPipeline;

/// What one pipeline run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Order lifecycle, for order events
    pub lifecycle: Option<OrderLifecycle>,
    /// Order lines whose quantity moved
    pub deltas: usize,
    /// Component stock levels written
    pub components_adjusted: usize,
    /// Bundles recomputed
    pub bundles_recalculated: usize,
    /// Bundles forced to zero by a failed component read
    pub bundles_zeroed: usize,
    /// Writes that failed and were skipped
    pub failed_writes: usize,
}

/// Result of handling one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pipeline ran
    Processed(ReconcileSummary),
    /// Delivery already handled
    Duplicate,
    /// Scope not acted on
    Ignored {
        /// Scope as sent
        scope: String,
    },
}

impl Outcome {
    /// Response message
    pub fn message(&self) -> String {
        match self {
            Outcome::Processed(summary) => match summary.lifecycle {
                Some(lifecycle) => format!(
                    "Processed {} order: {} line changes, {} bundles recalculated",
                    lifecycle, summary.deltas, summary.bundles_recalculated
                ),
                None => format!(
                    "Processed product update: {} bundles recalculated",
                    summary.bundles_recalculated
                ),
            },
            Outcome::Duplicate => "Duplicate webhook, already processed".to_string(),
            Outcome::Ignored { scope } => format!("Ignored scope {}", scope),
        }
    }
}

/// The reconciliation engine
pub struct Reconciler {
    catalogs: Arc<dyn CatalogProvider>,
    dedup: WebhookDeduplicator,
    history: Arc<dyn OrderHistoryStore>,
    settings: ReconcileSettings,
    locks: OrderLocks,
}

impl Reconciler {
    /// Wire the engine to its stores and catalog lookup
    pub fn new(
        catalogs: Arc<dyn CatalogProvider>,
        webhooks: Arc<dyn WebhookStore>,
        history: Arc<dyn OrderHistoryStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            dedup: WebhookDeduplicator::new(webhooks, settings.dedup_ttl, settings.duplicate_window),
            catalogs,
            history,
            settings,
            locks: OrderLocks::new(),
        }
    }

    /// Active policy
    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Handle a delivery to the order endpoint
    #[instrument(
        skip(self, event),
        fields(store_id = %event.store_id, order_id = event.resource_id, scope = %event.scope)
    )]
    pub async fn handle_order_event(&self, event: &WebhookEvent) -> Result<Outcome, WebhookError> {
        if event.typed_scope() != WebhookScope::OrderUpdated {
            return Ok(ignored(event));
        }
        let catalog = self.catalog_for(event)?;

        let _guard = self.locks.lock(event.resource_id, &event.store_id).await;
        let Some(key) = self.register(event).await else {
            return Ok(Outcome::Duplicate);
        };

        let pipeline = OrderPipeline {
            catalog,
            history: self.history.as_ref(),
            settings: &self.settings,
        };
        match pipeline.run(event.resource_id, &event.store_id).await {
            Ok(summary) => Ok(Outcome::Processed(summary)),
            Err(e) => {
                error!(error = %e, "Order unreadable; releasing webhook key for retry");
                self.dedup.release(&key).await;
                Err(WebhookError::Internal(format!(
                    "failed to read order {}: {}",
                    event.resource_id, e
                )))
            }
        }
    }

    /// Handle a delivery to the product endpoint
    #[instrument(
        skip(self, event),
        fields(store_id = %event.store_id, product_id = event.resource_id, scope = %event.scope)
    )]
    pub async fn handle_product_event(&self, event: &WebhookEvent) -> Result<Outcome, WebhookError> {
        if event.typed_scope() != WebhookScope::ProductUpdated {
            return Ok(ignored(event));
        }
        let catalog = self.catalog_for(event)?;

        let Some(key) = self.register(event).await else {
            return Ok(Outcome::Duplicate);
        };

        let pipeline = ProductPipeline {
            catalog,
            settings: &self.settings,
        };
        match pipeline.run(event.resource_id).await {
            Ok(summary) => Ok(Outcome::Processed(summary)),
            Err(e) => {
                error!(error = %e, "Product unreadable; releasing webhook key for retry");
                self.dedup.release(&key).await;
                Err(WebhookError::Internal(format!(
                    "failed to read product {}: {}",
                    event.resource_id, e
                )))
            }
        }
    }

    fn catalog_for(&self, event: &WebhookEvent) -> Result<Arc<dyn CatalogClient>, WebhookError> {
        self.catalogs.client_for(&event.store_id).ok_or_else(|| {
            info!("No credential stored for store");
            WebhookError::UnknownStore(event.store_id.clone())
        })
    }

    /// Pass the dedup gate; `None` when the delivery is a duplicate
    async fn register(&self, event: &WebhookEvent) -> Option<String> {
        let check = self
            .dedup
            .check_and_register(event.resource_id, &event.store_id, event.created_at, &event.scope)
            .await;
        if check.is_duplicate {
            info!(key = %check.key, "Skipping duplicate webhook");
            None
        } else {
            Some(check.key)
        }
    }
}

fn ignored(event: &WebhookEvent) -> Outcome {
    info!("Ignoring webhook scope");
    Outcome::Ignored {
        scope: event.scope.clone(),
    }
}
