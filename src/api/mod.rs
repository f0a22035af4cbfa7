//! # API Module
//!
//! HTTP and WebSocket surface of the relay:
//!
//! - `GET /health` - Liveness check
//! - `GET /metrics` - Prometheus metrics
//! - `GET /ws` - WebSocket upgrade into the relay protocol

pub mod handlers;
pub mod server;
pub mod websocket;

// Re-export commonly used items
pub use server::{create_app, serve, start_server};
