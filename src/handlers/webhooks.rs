//! Inbound webhook handlers
//!
//! ```text
//! POST /webhooks/{orders,products}
//!   X-Bundle-App-Update: true ──▶ 200 (self-write, nothing else runs)
//!   body unparseable ───────────▶ 400
//!   Reconciler ─────────────────▶ 200 | 401 | 500, JSON {"message": ...}
//! ```
//!
//! The body is taken as raw bytes so a malformed payload becomes our own 400
//! rather than the extractor's rejection.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::SELF_WRITE_HEADER;
use crate::error::MessageBody;
use crate::events::WebhookEvent;
use crate::handlers::status::AppState;
use crate::reconcile::{Outcome, Reconciler};

/// Shared state of the webhook routes
#[derive(Clone)]
pub struct WebhookState {
    /// The engine
    pub reconciler: Arc<Reconciler>,
    /// Counters
    pub app: Arc<AppState>,
}

impl WebhookState {
    /// Bundle the engine with its counters
    pub fn new(reconciler: Arc<Reconciler>, app: Arc<AppState>) -> Self {
        Self { reconciler, app }
    }
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Orders,
    Products,
}

/// Whether a request carries this engine's write marker
pub fn is_self_write(headers: &HeaderMap) -> bool {
    headers
        .get(SELF_WRITE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `POST /webhooks/orders`
pub async fn order_webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, Endpoint::Orders, headers, body).await
}

/// `POST /webhooks/products`
pub async fn product_webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, Endpoint::Products, headers, body).await
}

async fn handle(state: WebhookState, endpoint: Endpoint, headers: HeaderMap, body: Bytes) -> Response {
    let span = info_span!("webhook", request_id = %Uuid::new_v4(), endpoint = ?endpoint);
    async move {
        let started = Instant::now();
        state.app.record_received();

        if is_self_write(&headers) {
            info!("Skipping webhook caused by our own write");
            state.app.record_self_write();
            return reply(StatusCode::OK, "Skipped: update originated from this app");
        }

        let result = match WebhookEvent::from_bytes(&body) {
            Ok(event) => match endpoint {
                Endpoint::Orders => state.reconciler.handle_order_event(&event).await,
                Endpoint::Products => state.reconciler.handle_product_event(&event).await,
            },
            Err(e) => Err(e),
        };
        state.app.record_latency(started.elapsed());

        match result {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Processed(_) => state.app.record_processed(),
                    Outcome::Duplicate => state.app.record_duplicate(),
                    Outcome::Ignored { .. } => state.app.record_ignored(),
                }
                reply(StatusCode::OK, outcome.message())
            }
            Err(e) => {
                warn!(error = %e, "Webhook rejected");
                state.app.record_failed();
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

fn reply(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(MessageBody::new(message))).into_response()
}

/// Routes for both webhook endpoints
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/orders", post(order_webhook_handler))
        .route("/webhooks/products", post(product_webhook_handler))
        .with_state(state)
}
