//! # Routes
//!
//! Axum router configuration for the payment API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Service:
///   - GET  /health, GET / - Health check
///   - GET  /cart - Cart page (fallback when a provider is disabled)
///
/// - Catalog:
///   - GET  /api/products - Active products
///   - GET  /api/products/{product_id} - Single product
///
/// - Payment:
///   - GET  /cart/payment - Provider list
///   - POST /cart/payment - Initiate
///   - POST /cart/payment/callback - Provider notification
///   - GET  /cart/payment/success - Success return leg
///   - GET  /cart/payment/cancel - Cancel return leg
///
/// - Admin (bearer `ADMIN_TOKEN`):
///   - GET  /api/_/carts - All carts
///   - POST /api/_/carts/{cart_id}/mail - Re-send receipt
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let payment_routes = Router::new()
        .route("/callback", post(handlers::payment_callback))
        .route("/success", get(handlers::payment_success))
        .route("/cancel", get(handlers::payment_cancel));

    let api_routes = Router::new()
        .route("/products", get(handlers::list_products))
        .route("/products/{product_id}", get(handlers::get_product))
        .route("/_/carts", get(handlers::list_carts))
        .route("/_/carts/{cart_id}/mail", post(handlers::cart_send_mail));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .route("/cart", get(handlers::cart_page))
        .route("/cart/payment", get(handlers::payment_list).post(handlers::payment))
        .nest("/cart/payment", payment_routes)
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
