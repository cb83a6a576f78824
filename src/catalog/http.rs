//! REST catalog client
//!
//! Talks to the platform's v2 (orders) and v3 (catalog) REST APIs with
//! `reqwest`. Every write carries [`SELF_WRITE_HEADER`] so the webhook the
//! platform emits in response is recognized as our own and dropped.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::catalog::types::{
    Category, Metafield, Order, OrderProduct, Product, ProductInventoryUpdate, Variant,
    VariantInventoryUpdate,
};
use crate::catalog::{CatalogClient, CatalogProvider, CatalogResult};
use crate::config::ServiceConfig;
use crate::error::CatalogError;

/// Sideband header marking a write as originating from this engine
pub const SELF_WRITE_HEADER: &str = "X-Bundle-App-Update";

/// Credential header expected by the platform
const AUTH_HEADER: &str = "X-Auth-Token";

/// Page size for list endpoints
const PAGE_LIMIT: u32 = 250;

/// v3 response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_pages: u32,
    current_page: u32,
}

/// Catalog client bound to one store
#[derive(Clone)]
pub struct HttpCatalogClient {
    http: Client,
    base: Url,
    token: String,
    namespace: String,
}

impl std::fmt::Debug for HttpCatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCatalogClient")
            .field("base", &self.base.as_str())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl HttpCatalogClient {
    /// Create a client for `store_id` rooted at `api_base`
    pub fn new(
        http: Client,
        api_base: &str,
        store_id: &str,
        token: impl Into<String>,
        namespace: impl Into<String>,
    ) -> CatalogResult<Self> {
        let base = Url::parse(&format!(
            "{}/{}/",
            api_base.trim_end_matches('/'),
            store_id
        ))?;

        Ok(Self {
            http,
            base,
            token: token.into(),
            namespace: namespace.into(),
        })
    }

    fn url(&self, path: &str) -> CatalogResult<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn get(&self, path: &str) -> CatalogResult<RequestBuilder> {
        Ok(self
            .http
            .get(self.url(path)?)
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    fn put(&self, path: &str) -> CatalogResult<RequestBuilder> {
        Ok(self
            .http
            .put(self.url(path)?)
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(SELF_WRITE_HEADER, "true"))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> CatalogResult<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CatalogError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// GET a bare JSON body; `None` when the platform answers 204
    async fn get_v2<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<Option<T>> {
        let response = self.send(self.get(path)?.query(query), path).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.json::<T>().await?))
    }

    /// GET a v3 enveloped body
    async fn get_v3<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<Envelope<T>> {
        let response = self.send(self.get(path)?.query(query), path).await?;
        Ok(response.json::<Envelope<T>>().await?)
    }

    /// GET every page of a v3 list endpoint
    async fn get_v3_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut paged = query.to_vec();
            paged.push(("page", page.to_string()));
            paged.push(("limit", PAGE_LIMIT.to_string()));

            let envelope: Envelope<Vec<T>> = self.get_v3(path, &paged).await?;
            items.extend(envelope.data);

            let more = envelope
                .meta
                .and_then(|m| m.pagination)
                .map(|p| p.current_page < p.total_pages)
                .unwrap_or(false);
            if !more {
                break;
            }
            page += 1;
        }

        Ok(items)
    }

    async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> CatalogResult<()> {
        self.send(self.put(path)?.json(body), path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    #[instrument(skip(self))]
    async fn get_order(&self, order_id: i64) -> CatalogResult<Order> {
        let path = format!("v2/orders/{}", order_id);
        self.get_v2(&path, &[])
            .await?
            .ok_or(CatalogError::NotFound(path))
    }

    #[instrument(skip(self))]
    async fn get_order_products(&self, order_id: i64) -> CatalogResult<Vec<OrderProduct>> {
        let path = format!("v2/orders/{}/products", order_id);
        let mut lines = Vec::new();
        let mut page = 1u32;

        // v2 lists answer 204 past the last page
        loop {
            let batch = self
                .get_v2::<Vec<OrderProduct>>(
                    &path,
                    &[("page", page.to_string()), ("limit", PAGE_LIMIT.to_string())],
                )
                .await?
                .unwrap_or_default();
            let last = batch.len() < PAGE_LIMIT as usize;
            lines.extend(batch);
            if last {
                break;
            }
            page += 1;
        }

        debug!(order_id, lines = lines.len(), pages = page, "Fetched order lines");
        Ok(lines)
    }

    async fn find_category(&self, name: &str) -> CatalogResult<Option<Category>> {
        let envelope: Envelope<Vec<Category>> = self
            .get_v3("v3/catalog/categories", &[("name", name.to_string())])
            .await?;
        Ok(envelope.data.into_iter().find(|c| c.name == name))
    }

    async fn products_in_category(&self, category_id: i64) -> CatalogResult<Vec<Product>> {
        self.get_v3_all(
            "v3/catalog/products",
            &[
                ("categories:in", category_id.to_string()),
                ("include", "variants".to_string()),
            ],
        )
        .await
    }

    async fn product_metafields(&self, product_id: i64) -> CatalogResult<Vec<Metafield>> {
        self.get_v3_all(
            &format!("v3/catalog/products/{}/metafields", product_id),
            &[("namespace", self.namespace.clone())],
        )
        .await
    }

    async fn variant_metafields(
        &self,
        product_id: i64,
        variant_id: i64,
    ) -> CatalogResult<Vec<Metafield>> {
        self.get_v3_all(
            &format!(
                "v3/catalog/products/{}/variants/{}/metafields",
                product_id, variant_id
            ),
            &[("namespace", self.namespace.clone())],
        )
        .await
    }

    async fn get_product(&self, product_id: i64) -> CatalogResult<Product> {
        let envelope: Envelope<Product> = self
            .get_v3(&format!("v3/catalog/products/{}", product_id), &[])
            .await?;
        Ok(envelope.data)
    }

    async fn get_variant(&self, product_id: i64, variant_id: i64) -> CatalogResult<Variant> {
        let envelope: Envelope<Variant> = self
            .get_v3(
                &format!("v3/catalog/products/{}/variants/{}", product_id, variant_id),
                &[],
            )
            .await?;
        Ok(envelope.data)
    }

    async fn product_variants(&self, product_id: i64) -> CatalogResult<Vec<Variant>> {
        self.get_v3_all(&format!("v3/catalog/products/{}/variants", product_id), &[])
            .await
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_products(&self, updates: &[ProductInventoryUpdate]) -> CatalogResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.put_json("v3/catalog/products", updates).await
    }

    #[instrument(skip(self, update))]
    async fn update_variant(
        &self,
        product_id: i64,
        variant_id: i64,
        update: &VariantInventoryUpdate,
    ) -> CatalogResult<()> {
        self.put_json(
            &format!("v3/catalog/products/{}/variants/{}", product_id, variant_id),
            update,
        )
        .await
    }
}

/// Builds an [`HttpCatalogClient`] per store from configured credentials
#[derive(Clone)]
pub struct HttpCatalogProvider {
    http: Client,
    config: Arc<ServiceConfig>,
}

impl HttpCatalogProvider {
    /// Create a provider sharing one connection pool across stores
    pub fn new(config: Arc<ServiceConfig>) -> CatalogResult<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }
}

impl CatalogProvider for HttpCatalogProvider {
    fn client_for(&self, store_id: &str) -> Option<Arc<dyn CatalogClient>> {
        let token = self.config.store_token(store_id)?;
        match HttpCatalogClient::new(
            self.http.clone(),
            &self.config.api_base,
            store_id,
            token,
            &self.config.reconcile.metafield_namespace,
        ) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(store_id, error = %e, "Failed to build catalog client");
                None
            }
        }
    }
}
