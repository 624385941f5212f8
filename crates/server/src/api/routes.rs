use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{audit, handlers, middleware::metrics_middleware, orders};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::<Arc<AppState>>::new()
        // Health, config and load
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Orders
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/submit", post(orders::submit_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        .route("/orders/{id}/history", get(orders::order_history))
        // Batches and items
        .route("/batches/{id}/cancel", post(orders::cancel_batch))
        .route("/items/{id}/cancel", post(orders::cancel_item))
        .route("/items/{id}/download", post(orders::acknowledge_download));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
