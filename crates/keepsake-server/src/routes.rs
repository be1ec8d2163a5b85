//! Router

use std::path::Path;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::handlers::{
    create_checkout, create_order_handler, get_order, health_check, mercadopago_webhook,
    stripe_webhook, update_order, webhook_options, yampi_webhook,
};
use crate::state::AppState;

/// Order bodies carry base64 photos
pub const ORDER_BODY_LIMIT: usize = 25 * 1024 * 1024;

pub fn build_router(state: AppState, upload_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Orders
        .route(
            "/api/orders",
            post(create_order_handler).layer(DefaultBodyLimit::max(ORDER_BODY_LIMIT)),
        )
        .route(
            "/api/orders/{slug}",
            get(get_order).patch(update_order).layer(DefaultBodyLimit::max(ORDER_BODY_LIMIT)),
        )
        // Payments
        .route("/api/checkout", post(create_checkout))
        .route("/webhooks/mercadopago", post(mercadopago_webhook).options(webhook_options))
        .route("/webhooks/stripe", post(stripe_webhook).options(webhook_options))
        .route("/webhooks/yampi", post(yampi_webhook).options(webhook_options))
        // Local blob store files
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
