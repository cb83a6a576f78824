//! External catalog access
//!
//! The reconciliation engine never talks to the platform directly; every read
//! and write goes through a [`CatalogClient`] obtained from a
//! [`CatalogProvider`] for the store that produced the webhook.
//!
//! ```text
//! Reconciler ──▶ CatalogProvider::client_for(store) ──▶ CatalogClient
//!                          │                                 │
//!                          ▼                                 ▼
//!                   None => 401                  HttpCatalogClient (reqwest)
//!                                                FakeCatalog (tests)
//! ```

pub mod http;
pub mod types;

use std::sync::Arc;

use crate::error::CatalogError;

pub use http::{HttpCatalogClient, HttpCatalogProvider, SELF_WRITE_HEADER};
pub use types::{
    Category, Metafield, Order, OrderProduct, Product, ProductInventoryUpdate, Variant,
    VariantInventoryUpdate,
};

/// Result type for catalog calls
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Read/write access to one store's catalog
///
/// Implementations must tag every write as originating from this engine so
/// the resulting platform webhook can be discarded on arrival.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch order detail
    async fn get_order(&self, order_id: i64) -> CatalogResult<Order>;

    /// Fetch all lines of an order
    async fn get_order_products(&self, order_id: i64) -> CatalogResult<Vec<OrderProduct>>;

    /// Look up a category id by exact name
    async fn find_category(&self, name: &str) -> CatalogResult<Option<Category>>;

    /// List every product in a category, with variants
    async fn products_in_category(&self, category_id: i64) -> CatalogResult<Vec<Product>>;

    /// Product-level metafields in the configured namespace
    async fn product_metafields(&self, product_id: i64) -> CatalogResult<Vec<Metafield>>;

    /// Variant-level metafields in the configured namespace
    async fn variant_metafields(
        &self,
        product_id: i64,
        variant_id: i64,
    ) -> CatalogResult<Vec<Metafield>>;

    /// Fetch product detail
    async fn get_product(&self, product_id: i64) -> CatalogResult<Product>;

    /// Fetch variant detail
    async fn get_variant(&self, product_id: i64, variant_id: i64) -> CatalogResult<Variant>;

    /// List a product's variants
    async fn product_variants(&self, product_id: i64) -> CatalogResult<Vec<Variant>>;

    /// Batch product write
    async fn update_products(&self, updates: &[ProductInventoryUpdate]) -> CatalogResult<()>;

    /// Single variant write
    async fn update_variant(
        &self,
        product_id: i64,
        variant_id: i64,
        update: &VariantInventoryUpdate,
    ) -> CatalogResult<()>;
}

/// Resolves the catalog client for a store
pub trait CatalogProvider: Send + Sync {
    /// Client for `store_id`, or `None` when no credential is stored
    fn client_for(&self, store_id: &str) -> Option<Arc<dyn CatalogClient>>;
}
