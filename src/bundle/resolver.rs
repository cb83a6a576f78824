//! Bundle graph discovery
//!
//! Discovery is scoped to the products of one category so the cost of a
//! request is bounded by the number of bundles, not the size of the catalog.
//! A resolver lives for one request and caches everything it reads.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::bundle::model::{BundleDefinition, BundleGraph, BundleTarget, ItemRef};
use crate::catalog::{CatalogClient, Product};

/// Request-scoped view of a store's bundles
pub struct BundleGraphResolver {
    catalog: Arc<dyn CatalogClient>,
    category: String,
    graph: Option<BundleGraph>,
    item_cache: HashMap<ItemRef, Option<BundleDefinition>>,
}

impl BundleGraphResolver {
    /// Create a resolver scoped to `category`
    pub fn new(catalog: Arc<dyn CatalogClient>, category: impl Into<String>) -> Self {
        Self {
            catalog,
            category: category.into(),
            graph: None,
            item_cache: HashMap::new(),
        }
    }

    /// All active bundles, loaded once per resolver
    pub async fn find_bundles(&mut self) -> &BundleGraph {
        if self.graph.is_none() {
            let graph = self.load_graph().await;
            self.graph = Some(graph);
        }
        self.graph.get_or_insert_with(BundleGraph::default)
    }

    #[instrument(skip(self), fields(category = %self.category))]
    async fn load_graph(&self) -> BundleGraph {
        let category = match self.catalog.find_category(&self.category).await {
            Ok(Some(category)) => category,
            Ok(None) => {
                info!("Bundle category not found; using per-item checks");
                return BundleGraph::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to look up bundle category; using per-item checks");
                return BundleGraph::default();
            }
        };

        let products = match self.catalog.products_in_category(category.id).await {
            Ok(products) => products,
            Err(e) => {
                warn!(category_id = category.id, error = %e, "Failed to list bundle products");
                return BundleGraph::default();
            }
        };

        let definitions = join_all(products.iter().map(|p| self.product_definitions(p))).await;

        let mut graph = BundleGraph {
            category_found: true,
            ..BundleGraph::default()
        };
        for bundle in definitions.into_iter().flatten() {
            match bundle.target {
                BundleTarget::Product { .. } => graph.product_bundles.push(bundle),
                BundleTarget::Variant { .. } => graph.variant_bundles.push(bundle),
            }
        }

        debug!(
            products = products.len(),
            product_bundles = graph.product_bundles.len(),
            variant_bundles = graph.variant_bundles.len(),
            "Bundle graph loaded"
        );
        graph
    }

    /// Product-level and variant-level bundles declared on one product
    async fn product_definitions(&self, product: &Product) -> Vec<BundleDefinition> {
        let mut found = Vec::new();

        let target = BundleTarget::Product {
            product_id: product.id,
        };
        match self.catalog.product_metafields(product.id).await {
            Ok(fields) => found.extend(BundleDefinition::from_metafields(target, &fields)),
            Err(e) => warn!(product_id = product.id, error = %e, "Failed to read product metadata"),
        }

        for variant in &product.variants {
            let target = BundleTarget::Variant {
                product_id: product.id,
                variant_id: variant.id,
            };
            match self.catalog.variant_metafields(product.id, variant.id).await {
                Ok(fields) => found.extend(BundleDefinition::from_metafields(target, &fields)),
                Err(e) => warn!(
                    product_id = product.id,
                    variant_id = variant.id,
                    error = %e,
                    "Failed to read variant metadata"
                ),
            }
        }

        found
    }

    /// The bundle whose own stock is `item`, if any
    ///
    /// Variant-level definitions take precedence over the parent product's.
    pub async fn bundle_at(&mut self, item: ItemRef) -> Option<BundleDefinition> {
        let graph = self.find_bundles().await;
        if graph.category_found {
            return graph.bundle_at(&item).cloned();
        }

        if let Some(cached) = self.item_cache.get(&item) {
            return cached.clone();
        }
        let found = self.lookup_item(item).await;
        self.item_cache.insert(item, found.clone());
        found
    }

    /// Per-item metadata check used when the category is unavailable
    async fn lookup_item(&self, item: ItemRef) -> Option<BundleDefinition> {
        if let Some(variant_id) = item.variant_id {
            match self.catalog.variant_metafields(item.product_id, variant_id).await {
                Ok(fields) => {
                    let target = BundleTarget::Variant {
                        product_id: item.product_id,
                        variant_id,
                    };
                    if let Some(bundle) = BundleDefinition::from_metafields(target, &fields) {
                        return Some(bundle);
                    }
                }
                Err(e) => warn!(item = %item, error = %e, "Failed to read variant metadata"),
            }
        }

        match self.catalog.product_metafields(item.product_id).await {
            Ok(fields) => BundleDefinition::from_metafields(
                BundleTarget::Product {
                    product_id: item.product_id,
                },
                &fields,
            ),
            Err(e) => {
                warn!(item = %item, error = %e, "Failed to read product metadata");
                None
            }
        }
    }

    /// Bundles with a component drawing from `item`
    pub async fn bundles_containing(&mut self, item: ItemRef) -> Vec<BundleDefinition> {
        self.find_bundles()
            .await
            .containing(&item)
            .into_iter()
            .cloned()
            .collect()
    }
}
