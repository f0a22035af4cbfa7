//! HTTP server implementation for the relay

use std::future::Future;
use std::sync::Arc;

use axum::{
    http::{
        header::{
            HeaderName, CONTENT_TYPE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
            X_DNS_PREFETCH_CONTROL, X_FRAME_OPTIONS,
        },
        HeaderValue, Method,
    },
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::core::app_state::AppState;
use crate::core::error::{Error, Result};

use super::handlers;

const CROSS_ORIGIN_OPENER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-opener-policy");

/// Creates the application router with all routes and middleware
pub fn create_app(state: Arc<AppState>) -> Result<Router> {
    let origin = HeaderValue::from_str(&state.config.server.frontend_origin).map_err(|e| {
        Error::config(format!(
            "Invalid frontend origin {}: {}",
            state.config.server.frontend_origin, e
        ))
    })?;

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let security_headers = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_DNS_PREFETCH_CONTROL,
            HeaderValue::from_static("off"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CROSS_ORIGIN_OPENER_POLICY,
            HeaderValue::from_static("same-origin"),
        ));

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(handlers::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(security_headers),
        )
        .with_state(state);

    Ok(router)
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(state)?;
    let addr = listener.local_addr()?;

    info!("Relay listening on http://{}", addr);
    info!("WebSocket endpoint available at ws://{}/ws", addr);
    info!("Health check available at http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn start_server<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.config.server.bind_addr();
    info!("Starting relay server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind {}: {}", addr, e)))?;

    serve(listener, state, shutdown).await
}
