//! HTTP surface
//!
//! - [`webhooks`]: `POST /webhooks/orders`, `POST /webhooks/products`
//! - [`status`]: `GET /health`, `GET /ready`, `GET /status`

pub mod status;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;

use crate::reconcile::Reconciler;

pub use status::{status_router, AppState, HealthResponse, StatusResponse, WebhookCounts};
pub use webhooks::{is_self_write, webhook_router, WebhookState};

/// Full application router
pub fn app_router(reconciler: Arc<Reconciler>, app: Arc<AppState>) -> Router {
    Router::new()
        .merge(webhook_router(WebhookState::new(reconciler, app.clone())))
        .merge(status_router(app))
}
