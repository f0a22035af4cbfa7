//! HTTP request handlers for the relay

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::app_state::AppState;

use super::websocket;

/// Body of `GET /health`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `OK` while the process serves requests
    pub status: String,
    /// Human-readable status line
    pub message: String,
}

/// Liveness check
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Prometheus text exposition of the relay metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Upgrade to the relay's WebSocket protocol
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}
