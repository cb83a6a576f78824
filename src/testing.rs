//! In-memory catalog fakes
//!
//! [`FakeCatalog`] keeps orders, products, variants and metafields in memory,
//! applies writes to its own state so later reads see them, records every
//! write for assertions, and can be told to fail specific reads or writes.
//!
//! Compiled for unit tests and with the `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::bundle::model::{IS_BUNDLE_KEY, LINKED_COMPONENTS_KEY, OVERRIDE_PRICE_KEY};
use crate::bundle::{ItemRef, LinkedComponent};
use crate::catalog::{
    CatalogClient, CatalogProvider, CatalogResult, Category, Metafield, Order, OrderProduct,
    Product, ProductInventoryUpdate, Variant, VariantInventoryUpdate,
};
use crate::config::{DEFAULT_BUNDLE_CATEGORY, DEFAULT_METAFIELD_NAMESPACE};
use crate::error::CatalogError;

/// A recorded variant write
pub type VariantWrite = (i64, i64, VariantInventoryUpdate);

#[derive(Debug, Default)]
struct FakeState {
    orders: HashMap<i64, Order>,
    lines: HashMap<i64, Vec<OrderProduct>>,
    category: Option<Category>,
    category_members: BTreeSet<i64>,
    products: BTreeMap<i64, Product>,
    product_meta: HashMap<i64, Vec<Metafield>>,
    variant_meta: HashMap<(i64, i64), Vec<Metafield>>,
    failing_reads: HashSet<ItemRef>,
    failing_writes: HashSet<ItemRef>,
    fail_order_reads: bool,
    product_batches: Vec<Vec<ProductInventoryUpdate>>,
    variant_writes: Vec<VariantWrite>,
}

/// In-memory [`CatalogClient`]
#[derive(Debug, Default)]
pub struct FakeCatalog {
    state: RwLock<FakeState>,
}

impl FakeCatalog {
    /// An empty catalog without a bundle category
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the bundle category with `id`
    pub fn with_bundle_category(self, id: i64) -> Self {
        self.state.write().category = Some(Category {
            id,
            name: DEFAULT_BUNDLE_CATEGORY.to_string(),
        });
        self
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Add or replace a product
    pub fn add_product(&self, id: i64, inventory_level: i64, price: f64, weight: f64) {
        self.state.write().products.insert(
            id,
            Product {
                id,
                name: format!("Product {}", id),
                inventory_level,
                price,
                weight,
                variants: Vec::new(),
            },
        );
    }

    /// Add a variant, creating its product when missing
    pub fn add_variant(
        &self,
        product_id: i64,
        variant_id: i64,
        inventory_level: i64,
        price: Option<f64>,
        weight: Option<f64>,
    ) {
        let mut state = self.state.write();
        let product = state.products.entry(product_id).or_insert_with(|| Product {
            id: product_id,
            name: format!("Product {}", product_id),
            inventory_level: 0,
            price: 0.0,
            weight: 0.0,
            variants: Vec::new(),
        });
        product.variants.retain(|v| v.id != variant_id);
        product.variants.push(Variant {
            id: variant_id,
            product_id,
            inventory_level,
            price,
            calculated_price: price,
            weight,
            calculated_weight: weight,
        });
    }

    /// Mark a product as a bundle and place it in the bundle category
    pub fn set_product_bundle(
        &self,
        product_id: i64,
        components: &[LinkedComponent],
        override_price: Option<f64>,
    ) {
        let fields = bundle_fields(components, override_price);
        let mut state = self.state.write();
        state.product_meta.insert(product_id, fields);
        state.category_members.insert(product_id);
    }

    /// Mark a variant as a bundle and place its product in the bundle category
    pub fn set_variant_bundle(
        &self,
        product_id: i64,
        variant_id: i64,
        components: &[LinkedComponent],
        override_price: Option<f64>,
    ) {
        let fields = bundle_fields(components, override_price);
        let mut state = self.state.write();
        state.variant_meta.insert((product_id, variant_id), fields);
        state.category_members.insert(product_id);
    }

    /// Replace a product's raw metafields
    pub fn set_product_metafields(&self, product_id: i64, fields: Vec<Metafield>) {
        self.state.write().product_meta.insert(product_id, fields);
    }

    /// Add a product to the bundle category
    pub fn add_to_category(&self, product_id: i64) {
        self.state.write().category_members.insert(product_id);
    }

    /// Add or replace an order and its lines
    pub fn put_order(&self, order: Order, lines: Vec<OrderProduct>) {
        let mut state = self.state.write();
        state.lines.insert(order.id, lines);
        state.orders.insert(order.id, order);
    }

    /// Make reads of `item` fail
    pub fn fail_reads_for(&self, item: ItemRef) {
        self.state.write().failing_reads.insert(item);
    }

    /// Make writes touching `item` fail
    pub fn fail_writes_for(&self, item: ItemRef) {
        self.state.write().failing_writes.insert(item);
    }

    /// Make order reads fail
    pub fn set_fail_order_reads(&self, fail: bool) {
        self.state.write().fail_order_reads = fail;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current stock of `item`; 0 when unknown
    pub fn inventory(&self, item: ItemRef) -> i64 {
        let state = self.state.read();
        let Some(product) = state.products.get(&item.product_id) else {
            return 0;
        };
        match item.variant_id {
            Some(variant_id) => product
                .variants
                .iter()
                .find(|v| v.id == variant_id)
                .map(|v| v.inventory_level)
                .unwrap_or(0),
            None => product.inventory_level,
        }
    }

    /// Current product detail
    pub fn product(&self, product_id: i64) -> Option<Product> {
        self.state.read().products.get(&product_id).cloned()
    }

    /// Every product batch written, in order
    pub fn product_batches(&self) -> Vec<Vec<ProductInventoryUpdate>> {
        self.state.read().product_batches.clone()
    }

    /// Every variant write, in order
    pub fn variant_writes(&self) -> Vec<VariantWrite> {
        self.state.read().variant_writes.clone()
    }

    /// Locations written across all requests
    pub fn write_count(&self) -> usize {
        let state = self.state.read();
        state.product_batches.iter().map(Vec::len).sum::<usize>() + state.variant_writes.len()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        let mut state = self.state.write();
        state.product_batches.clear();
        state.variant_writes.clear();
    }

    fn check_read(&self, item: ItemRef) -> CatalogResult<()> {
        if self.state.read().failing_reads.contains(&item) {
            return Err(CatalogError::Transport(format!("injected read failure for {}", item)));
        }
        Ok(())
    }
}

fn bundle_fields(components: &[LinkedComponent], override_price: Option<f64>) -> Vec<Metafield> {
    let ns = DEFAULT_METAFIELD_NAMESPACE;
    let mut fields = vec![
        Metafield::new(ns, IS_BUNDLE_KEY, "true"),
        Metafield::new(
            ns,
            LINKED_COMPONENTS_KEY,
            serde_json::to_string(components).unwrap_or_else(|_| "[]".to_string()),
        ),
    ];
    if let Some(price) = override_price {
        fields.push(Metafield::new(ns, OVERRIDE_PRICE_KEY, price.to_string()));
    }
    fields
}

#[async_trait::async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_order(&self, order_id: i64) -> CatalogResult<Order> {
        let state = self.state.read();
        if state.fail_order_reads {
            return Err(CatalogError::Transport("injected order read failure".to_string()));
        }
        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("order {}", order_id)))
    }

    async fn get_order_products(&self, order_id: i64) -> CatalogResult<Vec<OrderProduct>> {
        let state = self.state.read();
        if state.fail_order_reads {
            return Err(CatalogError::Transport("injected order read failure".to_string()));
        }
        Ok(state.lines.get(&order_id).cloned().unwrap_or_default())
    }

    async fn find_category(&self, name: &str) -> CatalogResult<Option<Category>> {
        Ok(self
            .state
            .read()
            .category
            .clone()
            .filter(|category| category.name == name))
    }

    async fn products_in_category(&self, category_id: i64) -> CatalogResult<Vec<Product>> {
        let state = self.state.read();
        if state.category.as_ref().map(|c| c.id) != Some(category_id) {
            return Ok(Vec::new());
        }
        Ok(state
            .category_members
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn product_metafields(&self, product_id: i64) -> CatalogResult<Vec<Metafield>> {
        Ok(self
            .state
            .read()
            .product_meta
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn variant_metafields(
        &self,
        product_id: i64,
        variant_id: i64,
    ) -> CatalogResult<Vec<Metafield>> {
        Ok(self
            .state
            .read()
            .variant_meta
            .get(&(product_id, variant_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_product(&self, product_id: i64) -> CatalogResult<Product> {
        self.check_read(ItemRef::product(product_id))?;
        self.product(product_id)
            .ok_or_else(|| CatalogError::NotFound(format!("product {}", product_id)))
    }

    async fn get_variant(&self, product_id: i64, variant_id: i64) -> CatalogResult<Variant> {
        self.check_read(ItemRef::variant(product_id, variant_id))?;
        self.state
            .read()
            .products
            .get(&product_id)
            .and_then(|p| p.variants.iter().find(|v| v.id == variant_id).cloned())
            .ok_or_else(|| CatalogError::NotFound(format!("variant {}:{}", product_id, variant_id)))
    }

    async fn product_variants(&self, product_id: i64) -> CatalogResult<Vec<Variant>> {
        self.check_read(ItemRef::product(product_id))?;
        self.product(product_id)
            .map(|p| p.variants)
            .ok_or_else(|| CatalogError::NotFound(format!("product {}", product_id)))
    }

    async fn update_products(&self, updates: &[ProductInventoryUpdate]) -> CatalogResult<()> {
        let mut state = self.state.write();
        if updates
            .iter()
            .any(|u| state.failing_writes.contains(&ItemRef::product(u.id)))
        {
            return Err(CatalogError::Http {
                status: 500,
                message: "injected write failure".to_string(),
            });
        }

        for update in updates {
            if let Some(product) = state.products.get_mut(&update.id) {
                product.inventory_level = update.inventory_level;
                if let Some(price) = update.price {
                    product.price = price;
                }
                if let Some(weight) = update.weight {
                    product.weight = weight;
                }
            }
        }
        state.product_batches.push(updates.to_vec());
        Ok(())
    }

    async fn update_variant(
        &self,
        product_id: i64,
        variant_id: i64,
        update: &VariantInventoryUpdate,
    ) -> CatalogResult<()> {
        let mut state = self.state.write();
        if state
            .failing_writes
            .contains(&ItemRef::variant(product_id, variant_id))
        {
            return Err(CatalogError::Http {
                status: 500,
                message: "injected write failure".to_string(),
            });
        }

        let variant = state
            .products
            .get_mut(&product_id)
            .and_then(|p| p.variants.iter_mut().find(|v| v.id == variant_id));
        if let Some(variant) = variant {
            variant.inventory_level = update.inventory_level;
            if update.price.is_some() {
                variant.price = update.price;
            }
            if update.weight.is_some() {
                variant.weight = update.weight;
            }
        }
        state
            .variant_writes
            .push((product_id, variant_id, update.clone()));
        Ok(())
    }
}

/// [`CatalogProvider`] over a fixed set of clients
#[derive(Default)]
pub struct StaticCatalogProvider {
    clients: HashMap<String, Arc<dyn CatalogClient>>,
}

impl StaticCatalogProvider {
    /// Provider with no stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for `store_id`
    pub fn with_store(mut self, store_id: impl Into<String>, client: Arc<dyn CatalogClient>) -> Self {
        self.clients.insert(store_id.into(), client);
        self
    }
}

impl CatalogProvider for StaticCatalogProvider {
    fn client_for(&self, store_id: &str) -> Option<Arc<dyn CatalogClient>> {
        self.clients.get(store_id).cloned()
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// An order created at `created` and modified `modified_after_secs` later
pub fn order(id: i64, status_id: u32, created: DateTime<Utc>, modified_after_secs: i64) -> Order {
    Order {
        id,
        status_id,
        status: String::new(),
        date_created: created,
        date_modified: created + Duration::seconds(modified_after_secs),
    }
}

/// An order line with nothing refunded
pub fn order_line(product_id: i64, variant_id: Option<i64>, quantity: i64) -> OrderProduct {
    OrderProduct {
        id: product_id * 1000 + variant_id.unwrap_or(0),
        product_id,
        variant_id,
        quantity,
        quantity_refunded: 0,
        name: format!("Product {}", product_id),
        price_inc_tax: 10.0,
    }
}

/// A component reference
pub fn component(product_id: i64, variant_id: Option<i64>, quantity: i64) -> LinkedComponent {
    LinkedComponent {
        product_id,
        variant_id,
        quantity,
    }
}
