//! Order history
//!
//! Persists the last processed line-item snapshot of every order. The
//! snapshot is the baseline for the next delta computation and the source of
//! truth for what a cancellation must restore.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::catalog::OrderProduct;
use crate::error::StoreError;

/// One line of an order snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Ordered product
    pub product_id: i64,
    /// Ordered variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<i64>,
    /// Quantity at capture time
    pub quantity: i64,
    /// Line name
    #[serde(default)]
    pub name: String,
    /// Unit price including tax
    #[serde(default)]
    pub price_inc_tax: f64,
}

impl OrderItem {
    /// Identity used to match lines across snapshots
    pub fn line_key(&self) -> String {
        match self.variant_id {
            Some(variant_id) => format!("{}:{}", self.product_id, variant_id),
            None => self.product_id.to_string(),
        }
    }

    /// Same line with a different quantity
    pub fn with_quantity(&self, quantity: i64) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }
}

impl From<&OrderProduct> for OrderItem {
    fn from(line: &OrderProduct) -> Self {
        Self {
            product_id: line.product_id,
            variant_id: line.variant_id,
            quantity: line.quantity,
            name: line.name.clone(),
            price_inc_tax: line.price_inc_tax,
        }
    }
}

/// Last processed state of one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    /// Order id
    pub order_id: i64,
    /// Producing store
    pub store_id: String,
    /// Lines as last processed
    pub items: Vec<OrderItem>,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl OrderSnapshot {
    /// Snapshot taken now
    pub fn new(order_id: i64, store_id: impl Into<String>, items: Vec<OrderItem>) -> Self {
        Self {
            order_id,
            store_id: store_id.into(),
            items,
            captured_at: Utc::now(),
        }
    }
}

/// Storage for order snapshots, one row per `(order_id, store_id)`
#[async_trait::async_trait]
pub trait OrderHistoryStore: Send + Sync {
    /// Last stored snapshot, if any
    async fn load(&self, order_id: i64, store_id: &str) -> Result<Option<OrderSnapshot>, StoreError>;

    /// Insert or overwrite the snapshot for its order
    async fn save(&self, snapshot: &OrderSnapshot) -> Result<(), StoreError>;
}

/// In-memory snapshot store
///
/// Rows are kept as serialized JSON, mirroring the `order_items` column of a
/// relational table, so parse failures surface as [`StoreError::Corrupt`].
#[derive(Debug, Default)]
pub struct InMemoryOrderHistoryStore {
    rows: RwLock<HashMap<(i64, String), String>>,
}

impl InMemoryOrderHistoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether no order has been stored
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Overwrite a row with raw text (used to simulate corrupt rows)
    #[cfg(any(test, feature = "testing"))]
    pub fn put_raw(&self, order_id: i64, store_id: &str, raw: impl Into<String>) {
        self.rows
            .write()
            .insert((order_id, store_id.to_string()), raw.into());
    }
}

#[async_trait::async_trait]
impl OrderHistoryStore for InMemoryOrderHistoryStore {
    async fn load(&self, order_id: i64, store_id: &str) -> Result<Option<OrderSnapshot>, StoreError> {
        let raw = match self.rows.read().get(&(order_id, store_id.to_string())) {
            Some(raw) => raw.clone(),
            None => return Ok(None),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", order_id, e)))
    }

    async fn save(&self, snapshot: &OrderSnapshot) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.rows
            .write()
            .insert((snapshot.order_id, snapshot.store_id.clone()), raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(product_id: i64, variant_id: Option<i64>, quantity: i64) -> OrderItem {
        OrderItem {
            product_id,
            variant_id,
            quantity,
            name: format!("Item {}", product_id),
            price_inc_tax: 10.0,
        }
    }

    #[test]
    fn test_line_key() {
        assert_eq!(item(7, None, 1).line_key(), "7");
        assert_eq!(item(7, Some(42), 1).line_key(), "7:42");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryOrderHistoryStore::new();
        let snapshot = OrderSnapshot::new(100, "abc123", vec![item(1, None, 2)]);

        store.save(&snapshot).await.unwrap();
        let loaded = store.load(100, "abc123").await.unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert!(store.load(100, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = InMemoryOrderHistoryStore::new();
        store
            .save(&OrderSnapshot::new(100, "abc123", vec![item(1, None, 2)]))
            .await
            .unwrap();
        store
            .save(&OrderSnapshot::new(100, "abc123", vec![item(1, None, 5)]))
            .await
            .unwrap();

        let loaded = store.load(100, "abc123").await.unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(loaded.items[0].quantity, 5);
    }

    #[tokio::test]
    async fn test_corrupt_row() {
        let store = InMemoryOrderHistoryStore::new();
        store.put_raw(100, "abc123", "{not json");

        let err = store.load(100, "abc123").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
