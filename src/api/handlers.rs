//! API request handlers
//!
//! All endpoint handlers for the paper-trading API.

use crate::db::OrderType;
use crate::trading::{EngineError, NewOrder};
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

// ==========================================
// Response Helpers
// ==========================================

pub fn error_response(error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

pub fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

fn engine_error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::Validation(_)
        | EngineError::MarketClosed
        | EngineError::InsufficientFunds { .. }
        | EngineError::Fill(_) => StatusCode::BAD_REQUEST,
        EngineError::QuoteUnavailable(_) => StatusCode::BAD_GATEWAY,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Order placement failed: {}", err);
    }
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": err.to_string()
        })),
    )
        .into_response()
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    pub symbols: String,
}

#[derive(Debug, Deserialize)]
pub struct NotesUpdate {
    pub symbol: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub quantity: i64,
    pub order_type: String,
    pub price: Option<Decimal>,
}

// ==========================================
// Handlers
// ==========================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "paper_trading_server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn get_account(State(state): State<Arc<AppState>>) -> Response {
    match state.db.get_balance().await {
        Ok(balance) => Json(serde_json::json!({ "balance": balance })).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn get_profile(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "app_id": state.credentials.app_id_redacted(),
        "stream_connected": state.subscriptions.is_running()
    }))
}

/// Point-in-time quote passthrough for the dashboard.
pub async fn get_quotes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuotesQuery>,
) -> Response {
    let symbols: Vec<&str> = query
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if symbols.is_empty() {
        return bad_request("No symbols provided");
    }

    let mut quotes = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        match state.quotes.last_price(symbol).await {
            Ok(price) => quotes.push(serde_json::json!({ "symbol": symbol, "lp": price })),
            Err(e) => {
                quotes.push(serde_json::json!({ "symbol": symbol, "error": e.to_string() }))
            }
        }
    }

    Json(serde_json::json!({ "quotes": quotes })).into_response()
}

pub async fn get_portfolio(State(state): State<Arc<AppState>>) -> Response {
    match state.db.get_positions().await {
        Ok(positions) => {
            let portfolio: Vec<_> = positions
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "symbol": p.symbol,
                        "quantity": p.quantity,
                        "avg_price": p.avg_price,
                        "notes": p.notes,
                        "position_size": p.position_size()
                    })
                })
                .collect();
            Json(portfolio).into_response()
        }
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn get_pending_orders(State(state): State<Arc<AppState>>) -> Response {
    match state.db.get_pending_orders().await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn get_trade_history(State(state): State<Arc<AppState>>) -> Response {
    match state.db.get_trade_history().await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn update_notes(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotesUpdate>,
) -> Response {
    if req.symbol.trim().is_empty() {
        return bad_request("Symbol is required");
    }

    match state.db.update_notes(&req.symbol, &req.notes).await {
        Ok(()) => Json(serde_json::json!({
            "success": true,
            "message": "Notes updated successfully"
        }))
        .into_response(),
        Err(crate::db::DbError::NotFound) => bad_request("No position for that symbol"),
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Response {
    let order_type = match OrderType::parse(&req.order_type) {
        Some(t) => t,
        None => return bad_request("order_type must be MARKET or LIMIT"),
    };

    let result = state
        .engine
        .place_order(NewOrder {
            symbol: req.symbol,
            quantity: req.quantity,
            order_type,
            price: req.price,
        })
        .await;

    match result {
        Ok(placed) => Json(serde_json::json!({
            "success": true,
            "message": "Order placed successfully",
            "order_id": placed.order_id,
            "status": placed.status
        }))
        .into_response(),
        Err(e) => engine_error_response(e),
    }
}
