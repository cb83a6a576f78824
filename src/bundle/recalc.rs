//! Bundle inventory recalculation
//!
//! A bundle can be assembled as many times as its scarcest component allows:
//!
//! ```text
//! inventory = max(0, min_i floor(stock_i / quantity_i))
//! ```
//!
//! Component reads fail fast: one failed read forces the bundle to zero
//! rather than computing a minimum over a partial set. Writes are grouped so
//! product-level bundles share batch requests while variant-level bundles
//! need one request each.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::bundle::model::{BundleDefinition, BundleTarget, ItemRef};
use crate::catalog::{
    CatalogClient, CatalogResult, ProductInventoryUpdate, VariantInventoryUpdate,
};

/// Stock, price and weight of one component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentStock {
    /// Units on hand
    pub inventory_level: i64,
    /// Unit price
    pub price: f64,
    /// Unit weight
    pub weight: f64,
}

/// Where component stock is read from
#[async_trait::async_trait]
pub trait ComponentSource: Send + Sync {
    /// Live stock of `item`
    async fn fetch(&self, item: ItemRef) -> CatalogResult<ComponentStock>;
}

/// Reads component stock from the catalog
pub struct CatalogComponents {
    catalog: Arc<dyn CatalogClient>,
}

impl CatalogComponents {
    /// Wrap a catalog client
    pub fn new(catalog: Arc<dyn CatalogClient>) -> Self {
        Self { catalog }
    }
}

#[async_trait::async_trait]
impl ComponentSource for CatalogComponents {
    async fn fetch(&self, item: ItemRef) -> CatalogResult<ComponentStock> {
        match item.variant_id {
            Some(variant_id) => {
                let variant = self.catalog.get_variant(item.product_id, variant_id).await?;
                Ok(ComponentStock {
                    inventory_level: variant.inventory_level,
                    price: variant.effective_price(),
                    weight: variant.effective_weight(),
                })
            }
            None => {
                let product = self.catalog.get_product(item.product_id).await?;
                Ok(ComponentStock {
                    inventory_level: product.inventory_level,
                    price: product.price,
                    weight: product.weight,
                })
            }
        }
    }
}

/// How many bundles `stock` units can supply at `quantity` per bundle
pub fn buildable_units(stock: i64, quantity: i64) -> i64 {
    if quantity <= 0 || stock <= 0 {
        return 0;
    }
    stock / quantity
}

/// `max(0, min floor(stock / quantity))` over `(stock, quantity)` pairs
///
/// An empty component set yields 0.
pub fn inventory_level<I>(components: I) -> i64
where
    I: IntoIterator<Item = (i64, i64)>,
{
    components
        .into_iter()
        .map(|(stock, quantity)| buildable_units(stock, quantity))
        .min()
        .unwrap_or(0)
        .max(0)
}

/// Recomputed state of one bundle
#[derive(Debug, Clone, PartialEq)]
pub struct BundleTotals {
    /// New stock level
    pub inventory_level: i64,
    /// New price; `None` when it could not be determined
    pub price: Option<f64>,
    /// New weight; `None` when it could not be determined
    pub weight: Option<f64>,
    /// Whether every component was read
    pub complete: bool,
}

/// Recompute one bundle from live component stock
pub async fn recompute<S>(bundle: &BundleDefinition, source: &S) -> BundleTotals
where
    S: ComponentSource + ?Sized,
{
    let mut pairs = Vec::with_capacity(bundle.components.len());
    let mut price = 0.0;
    let mut weight = 0.0;

    for component in &bundle.components {
        match source.fetch(component.item()).await {
            Ok(stock) => {
                pairs.push((stock.inventory_level, component.quantity));
                price += stock.price * component.quantity as f64;
                weight += stock.weight * component.quantity as f64;
            }
            Err(e) => {
                warn!(
                    bundle = %bundle.target,
                    component = %component.item(),
                    error = %e,
                    "Component read failed; forcing bundle inventory to 0"
                );
                return BundleTotals {
                    inventory_level: 0,
                    price: bundle.override_price,
                    weight: None,
                    complete: false,
                };
            }
        }
    }

    BundleTotals {
        inventory_level: inventory_level(pairs),
        price: Some(bundle.override_price.unwrap_or_else(|| round_to(price, 2))),
        weight: Some(round_to(weight, 4)),
        complete: true,
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// One pending catalog write
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryWrite {
    /// Part of a product batch
    Product(ProductInventoryUpdate),
    /// A single variant request
    Variant {
        /// Parent product
        product_id: i64,
        /// Variant
        variant_id: i64,
        /// Payload
        update: VariantInventoryUpdate,
    },
}

impl InventoryWrite {
    /// Stock-only write for `item`
    pub fn stock(item: ItemRef, inventory_level: i64) -> Self {
        Self::build(item, inventory_level, None, None)
    }

    /// Write of recomputed bundle totals
    pub fn bundle(target: BundleTarget, totals: &BundleTotals) -> Self {
        Self::build(target.item(), totals.inventory_level, totals.price, totals.weight)
    }

    fn build(item: ItemRef, inventory_level: i64, price: Option<f64>, weight: Option<f64>) -> Self {
        let inventory_level = inventory_level.max(0);
        match item.variant_id {
            Some(variant_id) => InventoryWrite::Variant {
                product_id: item.product_id,
                variant_id,
                update: VariantInventoryUpdate {
                    inventory_level,
                    price,
                    weight,
                },
            },
            None => InventoryWrite::Product(ProductInventoryUpdate {
                id: item.product_id,
                inventory_level,
                price,
                weight,
            }),
        }
    }

    /// Location written
    pub fn item(&self) -> ItemRef {
        match self {
            InventoryWrite::Product(update) => ItemRef::product(update.id),
            InventoryWrite::Variant {
                product_id,
                variant_id,
                ..
            } => ItemRef::variant(*product_id, *variant_id),
        }
    }
}

/// Outcome of a set of writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Locations written
    pub written: usize,
    /// Locations whose write failed
    pub failed: usize,
}

impl WriteReport {
    /// Sum two reports
    pub fn merge(self, other: WriteReport) -> WriteReport {
        WriteReport {
            written: self.written + other.written,
            failed: self.failed + other.failed,
        }
    }
}

/// Apply writes best-effort
///
/// Later writes to the same location replace earlier ones. Product writes go
/// out in batches of at most `batch_size`; variant writes go one per request.
/// A failure is logged and counted without stopping the remaining writes.
pub async fn apply_writes(
    catalog: &dyn CatalogClient,
    writes: Vec<InventoryWrite>,
    batch_size: usize,
) -> WriteReport {
    let mut latest: BTreeMap<ItemRef, InventoryWrite> = BTreeMap::new();
    for write in writes {
        latest.insert(write.item(), write);
    }

    let mut products = Vec::new();
    let mut variants = Vec::new();
    for write in latest.into_values() {
        match write {
            InventoryWrite::Product(update) => products.push(update),
            InventoryWrite::Variant {
                product_id,
                variant_id,
                update,
            } => variants.push((product_id, variant_id, update)),
        }
    }

    let mut report = WriteReport::default();

    for batch in products.chunks(batch_size.max(1)) {
        match catalog.update_products(batch).await {
            Ok(()) => report.written += batch.len(),
            Err(e) => {
                let ids: Vec<i64> = batch.iter().map(|u| u.id).collect();
                error!(products = ?ids, error = %e, "Product batch write failed");
                report.failed += batch.len();
            }
        }
    }

    for (product_id, variant_id, update) in variants {
        match catalog.update_variant(product_id, variant_id, &update).await {
            Ok(()) => report.written += 1,
            Err(e) => {
                error!(product_id, variant_id, error = %e, "Variant write failed");
                report.failed += 1;
            }
        }
    }

    report
}

/// Summary of a recalculation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalcReport {
    /// Bundles recomputed
    pub bundles: usize,
    /// Bundles forced to zero by a failed component read
    pub incomplete: usize,
    /// Resulting writes
    pub writes: WriteReport,
}

/// Recomputes and writes bundle totals through one store's catalog
pub struct InventoryRecalculator {
    catalog: Arc<dyn CatalogClient>,
    components: CatalogComponents,
    batch_size: usize,
}

impl InventoryRecalculator {
    /// Create a recalculator writing product batches of `batch_size`
    pub fn new(catalog: Arc<dyn CatalogClient>, batch_size: usize) -> Self {
        Self {
            components: CatalogComponents::new(catalog.clone()),
            catalog,
            batch_size,
        }
    }

    /// Component source backed by the catalog
    pub fn components(&self) -> &CatalogComponents {
        &self.components
    }

    /// Recompute one bundle without writing
    pub async fn recompute(&self, bundle: &BundleDefinition) -> BundleTotals {
        recompute(bundle, &self.components).await
    }

    /// Recompute every bundle and write the results
    #[instrument(skip_all)]
    pub async fn recalculate<'a, I>(&self, bundles: I) -> RecalcReport
    where
        I: IntoIterator<Item = &'a BundleDefinition>,
    {
        let mut report = RecalcReport::default();
        let mut writes = Vec::new();

        for bundle in bundles {
            let totals = self.recompute(bundle).await;
            debug!(
                bundle = %bundle.target,
                inventory_level = totals.inventory_level,
                price = ?totals.price,
                "Bundle recomputed"
            );
            report.bundles += 1;
            if !totals.complete {
                report.incomplete += 1;
            }
            writes.push(InventoryWrite::bundle(bundle.target, &totals));
        }

        report.writes = self.write(writes).await;
        report
    }

    /// Apply raw writes through this recalculator's catalog
    pub async fn write(&self, writes: Vec<InventoryWrite>) -> WriteReport {
        if writes.is_empty() {
            return WriteReport::default();
        }
        apply_writes(self.catalog.as_ref(), writes, self.batch_size).await
    }
}
