//! WebSocket handler for live price updates to the frontend
//!
//! Every tick from the broker stream is forwarded unchanged to each
//! connected client (fan-out, not buffered).

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticks = state.subscriptions.ticks();

    info!("WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match ticks.recv().await {
                Ok(tick) => {
                    if sender.send(Message::Text(tick)).await.is_err() {
                        break;
                    }
                }
                // Slow client: drop what it missed and keep streaming.
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged, skipped {} ticks", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!("Received WebSocket message: {}", text);
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum.
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket client requested close");
                    break;
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}
