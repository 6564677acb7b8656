//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use crate::api::websocket::ws_handler;
use axum::{
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Unknown routes get a JSON 404
async fn fallback_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(handlers::ApiError {
            error: format!("No route for {}", uri.path()),
        }),
    )
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // WebSocket for real-time updates
        .route("/ws", get(ws_handler))
        // Products
        .route(
            "/api/products",
            get(handlers::list_products).post(handlers::register_product),
        )
        .route("/api/verify/{product_id}", get(handlers::verify_product))
        // Chain endpoints
        .route("/api/chain", get(handlers::get_chain))
        .route("/api/chain/blocks/{index}", get(handlers::get_block))
        .route("/api/chain/validate", get(handlers::validate_chain))
        .route("/api/stats", get(handlers::get_stats))
        // Mining
        .route("/api/mine", post(handlers::mine_block))
        .route("/api/pending", get(handlers::get_pending))
        // Manufacturers
        .route("/api/manufacturers", get(handlers::list_manufacturers))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
