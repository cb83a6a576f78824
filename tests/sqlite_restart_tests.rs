//! Reconciliation state kept in SQLite across process restarts

use std::path::PathBuf;
use std::sync::Arc;

use bundle_sync::bundle::ItemRef;
use bundle_sync::catalog::types::status;
use bundle_sync::catalog::CatalogClient;
use bundle_sync::config::ReconcileSettings;
use bundle_sync::events::WebhookEvent;
use bundle_sync::reconcile::{Outcome, Reconciler};
use bundle_sync::sqlite::SqliteStore;
use bundle_sync::testing::{component, order, order_line, FakeCatalog, StaticCatalogProvider};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

const STORE: &str = "abc123";

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

/// Component 1 (stock 10); bundle 50 = 2×component 1
fn catalog() -> Arc<FakeCatalog> {
    let catalog = FakeCatalog::new().with_bundle_category(7);
    catalog.add_product(1, 10, 5.0, 1.0);
    catalog.add_product(50, 0, 0.0, 0.0);
    catalog.set_product_bundle(50, &[component(1, None, 2)], None);
    Arc::new(catalog)
}

fn reconciler(catalog: &Arc<FakeCatalog>, store: Arc<SqliteStore>) -> Reconciler {
    let client: Arc<dyn CatalogClient> = catalog.clone();
    Reconciler::new(
        Arc::new(StaticCatalogProvider::new().with_store(STORE, client)),
        store.clone(),
        store,
        ReconcileSettings::default(),
    )
}

fn order_event(created_at: i64) -> WebhookEvent {
    WebhookEvent {
        scope: "store/order/updated".to_string(),
        resource_id: 100,
        created_at,
        store_id: STORE.to_string(),
    }
}

#[tokio::test]
async fn test_cancellation_after_restart_restores_stock() {
    let db = TempDb::new();
    let catalog = catalog();
    let created = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
    catalog.put_order(order(100, 11, created, 0), vec![order_line(50, None, 2)]);

    let store = Arc::new(SqliteStore::connect(&db.url()).await.unwrap());
    reconciler(&catalog, store.clone())
        .handle_order_event(&order_event(1))
        .await
        .unwrap();
    assert_eq!(catalog.inventory(ItemRef::product(1)), 6);
    store.close().await;

    let store = Arc::new(SqliteStore::connect(&db.url()).await.unwrap());
    let restarted = reconciler(&catalog, store.clone());

    // The original delivery is still a duplicate after the restart.
    let again = restarted.handle_order_event(&order_event(1)).await.unwrap();
    assert_eq!(again, Outcome::Duplicate);
    assert_eq!(catalog.inventory(ItemRef::product(1)), 6);

    catalog.put_order(
        order(100, status::CANCELLED, created, 120),
        vec![order_line(50, None, 0)],
    );
    restarted.handle_order_event(&order_event(2)).await.unwrap();

    assert_eq!(catalog.inventory(ItemRef::product(1)), 10);
    assert_eq!(catalog.inventory(ItemRef::product(50)), 5);
    store.close().await;
}
