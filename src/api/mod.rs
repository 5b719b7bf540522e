//! API module - Axum HTTP server and routes

mod handlers;
mod websocket;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/api/health", get(handlers::health_check))
        // Account & profile
        .route("/api/account", get(handlers::get_account))
        .route("/api/profile", get(handlers::get_profile))
        // Market data passthrough
        .route("/api/quotes", get(handlers::get_quotes))
        // Portfolio & history
        .route("/api/portfolio", get(handlers::get_portfolio))
        .route("/api/portfolio/notes", post(handlers::update_notes))
        .route("/api/pending_orders", get(handlers::get_pending_orders))
        .route("/api/trade_history", get(handlers::get_trade_history))
        // Order placement
        .route("/api/orders", post(handlers::place_order))
        // WebSocket for live ticks
        .route("/ws", get(websocket::ws_handler))
        // Apply middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
