//! Product-event pipeline
//!
//! A product edit only matters to the bundles that draw on it. The graph is
//! resolved once, the product's variants are read once, and exactly the
//! bundles referencing the product or one of its variants are recalculated.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::bundle::{BundleDefinition, BundleGraphResolver, InventoryRecalculator};
use crate::catalog::{CatalogClient, CatalogResult};
use crate::config::ReconcileSettings;
use crate::error::CatalogError;
use crate::reconcile::ReconcileSummary;

/// One run of the product pipeline against one store
pub(crate) struct ProductPipeline<'a> {
    pub catalog: Arc<dyn CatalogClient>,
    pub settings: &'a ReconcileSettings,
}

impl ProductPipeline<'_> {
    #[instrument(skip(self))]
    pub async fn run(&self, product_id: i64) -> CatalogResult<ReconcileSummary> {
        let mut resolver =
            BundleGraphResolver::new(self.catalog.clone(), self.settings.bundle_category.clone());
        if resolver.find_bundles().await.is_empty() {
            debug!("No bundles in store");
            return Ok(ReconcileSummary::default());
        }

        let variant_ids: HashSet<i64> = match self.catalog.product_variants(product_id).await {
            Ok(variants) => variants.into_iter().map(|v| v.id).collect(),
            Err(CatalogError::NotFound(_)) => {
                debug!("Product has no readable variants");
                HashSet::new()
            }
            Err(e) => return Err(e),
        };

        let affected: Vec<BundleDefinition> = resolver
            .find_bundles()
            .await
            .all()
            .filter(|bundle| bundle.references_product(product_id, &variant_ids))
            .cloned()
            .collect();

        if affected.is_empty() {
            debug!("Product is not a bundle component");
            return Ok(ReconcileSummary::default());
        }

        let recalculator =
            InventoryRecalculator::new(self.catalog.clone(), self.settings.product_batch_size);
        let recalc = recalculator.recalculate(&affected).await;

        info!(
            bundles_recalculated = recalc.bundles,
            bundles_zeroed = recalc.incomplete,
            failed_writes = recalc.writes.failed,
            "Product change propagated to bundles"
        );

        Ok(ReconcileSummary {
            lifecycle: None,
            deltas: 0,
            components_adjusted: 0,
            bundles_recalculated: recalc.bundles,
            bundles_zeroed: recalc.incomplete,
            failed_writes: recalc.writes.failed,
        })
    }
}
