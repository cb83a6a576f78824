//! HTTP surface tests driven through the axum router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bundle_sync::bundle::ItemRef;
use bundle_sync::catalog::{CatalogClient, SELF_WRITE_HEADER};
use bundle_sync::config::ReconcileSettings;
use bundle_sync::dedup::InMemoryWebhookStore;
use bundle_sync::handlers::{app_router, AppState, StatusResponse};
use bundle_sync::history::InMemoryOrderHistoryStore;
use bundle_sync::reconcile::Reconciler;
use bundle_sync::testing::{component, order, order_line, FakeCatalog, StaticCatalogProvider};
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

const STORE: &str = "abc123";

fn setup() -> (Router, Arc<FakeCatalog>, Arc<AppState>) {
    let catalog = FakeCatalog::new().with_bundle_category(7);
    catalog.add_product(1, 10, 5.0, 1.0);
    catalog.add_product(50, 0, 0.0, 0.0);
    catalog.set_product_bundle(50, &[component(1, None, 2)], None);
    catalog.put_order(
        order(100, 11, Utc::now(), 0),
        vec![order_line(50, None, 1)],
    );
    let catalog = Arc::new(catalog);
    let client: Arc<dyn CatalogClient> = catalog.clone();

    let reconciler = Reconciler::new(
        Arc::new(StaticCatalogProvider::new().with_store(STORE, client)),
        Arc::new(InMemoryWebhookStore::new()),
        Arc::new(InMemoryOrderHistoryStore::new()),
        ReconcileSettings::default(),
    );
    let app_state = Arc::new(AppState::new(1));
    let router = app_router(Arc::new(reconciler), app_state.clone());
    (router, catalog, app_state)
}

fn order_payload(order_id: i64, store: &str) -> Value {
    json!({
        "scope": "store/order/updated",
        "data": {"type": "order", "id": order_id},
        "created_at": 1_700_000_000,
        "producer": format!("stores/{}", store),
        "hash": "3f29a2c1"
    })
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_order_webhook_processed_then_duplicate() {
    let (router, catalog, app) = setup();
    let payload = order_payload(100, STORE).to_string();

    let (status, body) = send(&router, post("/webhooks/orders", payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().starts_with("Processed new order"));
    assert_eq!(catalog.inventory(ItemRef::product(1)), 8);

    let (status, body) = send(&router, post("/webhooks/orders", payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("Duplicate"));
    assert_eq!(catalog.inventory(ItemRef::product(1)), 8);

    let counts = app.webhook_counts();
    assert_eq!(counts.processed, 1);
    assert_eq!(counts.duplicates, 1);
}

#[tokio::test]
async fn test_self_write_short_circuits() {
    let (router, catalog, app) = setup();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/orders")
        .header(SELF_WRITE_HEADER, "true")
        // Not even valid JSON: nothing past the header check may run.
        .body(Body::from("garbage"))
        .unwrap();

    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().starts_with("Skipped"));
    assert_eq!(catalog.write_count(), 0);
    assert_eq!(app.webhook_counts().self_writes, 1);
}

#[tokio::test]
async fn test_malformed_payload_is_400() {
    let (router, _, app) = setup();

    let (status, body) = send(&router, post("/webhooks/orders", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let missing_id = json!({"scope": "store/order/updated", "producer": "stores/abc123"});
    let (status, _) = send(&router, post("/webhooks/orders", missing_id.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.webhook_counts().failed, 2);
}

#[tokio::test]
async fn test_unknown_store_is_401() {
    let (router, catalog, _) = setup();
    let payload = order_payload(100, "unknown-store").to_string();

    let (status, body) = send(&router, post("/webhooks/orders", payload)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("unknown-store"));
    assert_eq!(catalog.write_count(), 0);
}

#[tokio::test]
async fn test_other_scope_is_noop() {
    let (router, catalog, app) = setup();
    let mut payload = order_payload(100, STORE);
    payload["scope"] = json!("store/order/statusUpdated");

    let (status, _) = send(&router, post("/webhooks/orders", payload.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(catalog.write_count(), 0);
    assert_eq!(app.webhook_counts().ignored, 1);
}

#[tokio::test]
async fn test_product_webhook_recalculates() {
    let (router, catalog, _) = setup();
    let payload = json!({
        "scope": "store/product/updated",
        "data": {"type": "product", "id": 1},
        "created_at": 1_700_000_100,
        "producer": "stores/abc123"
    });

    let (status, body) = send(&router, post("/webhooks/products", payload.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("1 bundles recalculated"));
    assert_eq!(catalog.inventory(ItemRef::product(50)), 5);
}

#[tokio::test]
async fn test_unreadable_order_is_500() {
    let (router, catalog, _) = setup();
    catalog.set_fail_order_reads(true);

    let (status, body) = send(
        &router,
        post("/webhooks/orders", order_payload(100, STORE).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_status_endpoints() {
    let (router, _, _) = setup();
    send(
        &router,
        post("/webhooks/orders", order_payload(100, STORE).to_string()),
    )
    .await;

    let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    let report: StatusResponse = serde_json::from_value(body).unwrap();
    assert_eq!(report.name, "bundle-sync");
    assert_eq!(report.webhooks.received, 1);
    assert_eq!(report.webhooks.processed, 1);
    assert_eq!(report.latency.total_requests, 1);
}
