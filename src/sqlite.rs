//! SQLite persistence
//!
//! [`SqliteStore`] backs both the dedup gate and the order history with two
//! tables:
//!
//! - `webhook_processed`: one row per idempotency key, `webhook_id UNIQUE`
//! - `order_history`: one snapshot per order, unique on `(order_id, store_id)`
//!
//! Timestamps are stored as Unix milliseconds.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::dedup::{InsertOutcome, WebhookRecord, WebhookStore};
use crate::error::{ConfigError, Result, StoreError};
use crate::history::{OrderHistoryStore, OrderItem, OrderSnapshot};

const CREATE_WEBHOOK_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_processed (
    webhook_id   TEXT    NOT NULL UNIQUE,
    order_id     INTEGER NOT NULL,
    store_id     TEXT    NOT NULL,
    processed_at INTEGER NOT NULL,
    expires_at   INTEGER NOT NULL
)
"#;

const CREATE_WEBHOOK_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_webhook_processed_order
    ON webhook_processed (order_id, store_id, processed_at)
"#;

const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_history (
    order_id    INTEGER NOT NULL,
    store_id    TEXT    NOT NULL,
    order_items TEXT    NOT NULL,
    created_at  INTEGER NOT NULL,
    UNIQUE (order_id, store_id)
)
"#;

// An expired row under the same key is taken over; a live one is left alone
// and the statement reports zero affected rows.
const INSERT_WEBHOOK: &str = r#"
INSERT INTO webhook_processed (webhook_id, order_id, store_id, processed_at, expires_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (webhook_id) DO UPDATE SET
    order_id = excluded.order_id,
    store_id = excluded.store_id,
    processed_at = excluded.processed_at,
    expires_at = excluded.expires_at
WHERE webhook_processed.expires_at <= excluded.processed_at
"#;

const UPSERT_SNAPSHOT: &str = r#"
INSERT INTO order_history (order_id, store_id, order_items, created_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (order_id, store_id) DO UPDATE SET
    order_items = excluded.order_items,
    created_at = excluded.created_at
"#;

/// Dedup records and order snapshots in one SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool; call [`init_schema`](Self::init_schema) before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when `url` is not a SQLite URL, [`StoreError`] when the
    /// database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "BUNDLE_SYNC_DATABASE_URL".to_string(),
            message,
        };
        if !url.starts_with("sqlite:") {
            return Err(invalid(format!("expected a sqlite: URL, got {}", url)).into());
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| invalid(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;

        let store = Self::new(pool);
        store.init_schema().await?;
        info!(url, "Opened SQLite store");
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        // Every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;

        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> std::result::Result<(), StoreError> {
        for statement in [CREATE_WEBHOOK_TABLE, CREATE_WEBHOOK_INDEX, CREATE_HISTORY_TABLE] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(value: i64, column: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn webhook_from_row(row: &SqliteRow) -> std::result::Result<WebhookRecord, StoreError> {
    Ok(WebhookRecord {
        webhook_id: row.try_get("webhook_id")?,
        resource_id: row.try_get("order_id")?,
        store_id: row.try_get("store_id")?,
        processed_at: from_millis(row.try_get("processed_at")?, "processed_at")?,
        expires_at: from_millis(row.try_get("expires_at")?, "expires_at")?,
    })
}

#[async_trait]
impl WebhookStore for SqliteStore {
    async fn insert(&self, record: WebhookRecord) -> std::result::Result<InsertOutcome, StoreError> {
        let result = sqlx::query(INSERT_WEBHOOK)
            .bind(&record.webhook_id)
            .bind(record.resource_id)
            .bind(&record.store_id)
            .bind(millis(record.processed_at))
            .bind(millis(record.expires_at))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(InsertOutcome::Conflict);
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, webhook_id: &str) -> std::result::Result<Option<WebhookRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT webhook_id, order_id, store_id, processed_at, expires_at \
             FROM webhook_processed WHERE webhook_id = ?1",
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn find_since(
        &self,
        resource_id: i64,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<WebhookRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT webhook_id, order_id, store_id, processed_at, expires_at \
             FROM webhook_processed \
             WHERE order_id = ?1 AND store_id = ?2 AND processed_at >= ?3",
        )
        .bind(resource_id)
        .bind(store_id)
        .bind(millis(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(webhook_from_row).collect()
    }

    async fn remove(&self, webhook_id: &str) -> std::result::Result<(), StoreError> {
        sqlx::query("DELETE FROM webhook_processed WHERE webhook_id = ?1")
            .bind(webhook_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_processed WHERE expires_at <= ?1")
            .bind(millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl OrderHistoryStore for SqliteStore {
    async fn load(
        &self,
        order_id: i64,
        store_id: &str,
    ) -> std::result::Result<Option<OrderSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT order_items, created_at FROM order_history \
             WHERE order_id = ?1 AND store_id = ?2",
        )
        .bind(order_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("order_items")?;
        let items: Vec<OrderItem> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", order_id, e)))?;

        Ok(Some(OrderSnapshot {
            order_id,
            store_id: store_id.to_string(),
            items,
            captured_at: from_millis(row.try_get("created_at")?, "created_at")?,
        }))
    }

    async fn save(&self, snapshot: &OrderSnapshot) -> std::result::Result<(), StoreError> {
        let items = serde_json::to_string(&snapshot.items)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        sqlx::query(UPSERT_SNAPSHOT)
            .bind(snapshot.order_id)
            .bind(&snapshot.store_id)
            .bind(items)
            .bind(millis(snapshot.captured_at))
            .execute(&self.pool)
            .await?;

        debug!(order_id = snapshot.order_id, lines = snapshot.items.len(), "Saved order snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::dedup::WebhookDeduplicator;
    use pretty_assertions::assert_eq;

    fn record(key: &str, resource_id: i64, at: DateTime<Utc>, ttl_secs: i64) -> WebhookRecord {
        WebhookRecord {
            webhook_id: key.to_string(),
            resource_id,
            store_id: "abc123".to_string(),
            processed_at: at,
            expires_at: at + chrono::Duration::seconds(ttl_secs),
        }
    }

    fn item(product_id: i64, quantity: i64) -> OrderItem {
        OrderItem {
            product_id,
            variant_id: None,
            quantity,
            name: format!("Item {}", product_id),
            price_inc_tax: 10.0,
        }
    }

    /// Database file removed on drop
    struct TempDb(PathBuf);

    impl TempDb {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("bundle-sync-{}.db", uuid::Uuid::new_v4())))
        }

        fn url(&self) -> String {
            format!("sqlite://{}", self.0.display())
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.0.display(), suffix));
            }
        }
    }

    #[tokio::test]
    async fn test_live_key_conflicts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();

        let first = store.insert(record("k", 100, now, 3600)).await.unwrap();
        let second = store.insert(record("k", 100, now, 3600)).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_expired_key_is_taken_over() {
        let store = SqliteStore::in_memory().await.unwrap();
        let start = Utc::now();

        store.insert(record("k", 100, start, 60)).await.unwrap();
        let later = start + chrono::Duration::hours(1);
        let again = store.insert(record("k", 100, later, 60)).await.unwrap();

        assert_eq!(again, InsertOutcome::Inserted);
        let stored = store.get("k").await.unwrap().unwrap();
        assert_eq!(stored.processed_at.timestamp_millis(), later.timestamp_millis());
    }

    #[tokio::test]
    async fn test_find_remove_and_purge() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();

        store
            .insert(record("old", 100, now - chrono::Duration::hours(2), 60))
            .await
            .unwrap();
        store.insert(record("recent", 100, now, 3600)).await.unwrap();
        store.insert(record("other", 200, now, 3600)).await.unwrap();

        let since = store
            .find_since(100, "abc123", now - chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].webhook_id, "recent");

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());

        store.remove("recent").await.unwrap();
        assert!(store.get("recent").await.unwrap().is_none());
        assert!(store.get("other").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(store.load(100, "abc123").await.unwrap().is_none());
        store
            .save(&OrderSnapshot::new(100, "abc123", vec![item(1, 2)]))
            .await
            .unwrap();
        store
            .save(&OrderSnapshot::new(100, "abc123", vec![item(1, 5), item(2, 1)]))
            .await
            .unwrap();

        let loaded = store.load(100, "abc123").await.unwrap().unwrap();
        assert_eq!(loaded.items, vec![item(1, 5), item(2, 1)]);
        assert!(store.load(100, "other").await.unwrap().is_none());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_history")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        sqlx::query(UPSERT_SNAPSHOT)
            .bind(100_i64)
            .bind("abc123")
            .bind("{not json")
            .bind(0_i64)
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.load(100, "abc123").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let db = TempDb::new();
        let now = Utc::now();

        let store = SqliteStore::connect(&db.url()).await.unwrap();
        store.insert(record("k", 100, now, 3600)).await.unwrap();
        store
            .save(&OrderSnapshot::new(100, "abc123", vec![item(1, 2)]))
            .await
            .unwrap();
        store.close().await;

        let reopened = SqliteStore::connect(&db.url()).await.unwrap();
        assert_eq!(
            reopened.insert(record("k", 100, now, 3600)).await.unwrap(),
            InsertOutcome::Conflict
        );
        let snapshot = reopened.load(100, "abc123").await.unwrap().unwrap();
        assert_eq!(snapshot.items, vec![item(1, 2)]);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = SqliteStore::connect("postgres://localhost/db").await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gate_passes_once() {
        let store: Arc<dyn WebhookStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let gate = Arc::new(WebhookDeduplicator::new(
            store,
            std::time::Duration::from_secs(3600),
            std::time::Duration::from_secs(5),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.check_and_register(100, "abc123", 1_700_000_000, "store/order/updated")
                        .await
                })
            })
            .collect();

        let passed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|check| !check.as_ref().unwrap().is_duplicate)
            .count();
        assert_eq!(passed, 1);
    }
}
