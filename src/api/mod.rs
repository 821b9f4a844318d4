//! HTTP API
//!
//! REST routes under `/api`, a root status route and the `/ws` live channel,
//! all backed by a shared [`Controller`].

pub mod models;
mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::controller::Controller;
use crate::error::ScareBoxError;

pub use models::ApiError;

/// Shared state for every handler.
#[derive(Debug)]
pub struct AppState {
    /// The orchestrator.
    pub controller: Arc<Controller>,
    /// Messages buffered per WebSocket client.
    pub subscriber_queue: usize,
}

/// Builds the router. `cors_origins` containing `"*"` allows any origin.
#[must_use]
pub fn router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/config", get(routes::get_config).put(routes::update_config))
        .route("/mode", get(routes::get_mode).put(routes::set_mode))
        .route("/trigger", axum::routing::post(routes::trigger))
        .route("/start", axum::routing::post(routes::start))
        .route("/stop", axum::routing::post(routes::stop))
        .route("/state", get(routes::get_state))
        .route("/devices", get(routes::devices))
        .route("/devices/microphone", get(routes::microphone))
        .route("/devices/lights", get(routes::lights))
        .route("/devices/speaker", get(routes::speaker))
        .route("/events", get(routes::events))
        .route("/events/stats", get(routes::event_stats));

    Router::new()
        .route("/", get(routes::root))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Normalizes `port`, `:port` or `host:port` into a socket address string.
///
/// # Errors
///
/// Returns [`ScareBoxError::Usage`] if the result is not a valid address.
pub fn parse_bind_addr(input: &str) -> Result<String, ScareBoxError> {
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse::<SocketAddr>()
        .map_err(|e| ScareBoxError::Usage(format!("invalid bind address \"{input}\": {e}")))?;
    Ok(addr)
}

/// Binds `addr` and serves `app` until `cancel` fires.
///
/// Returns the bound address and the server task.
///
/// # Errors
///
/// Returns [`ScareBoxError::Server`] if the listener cannot bind.
pub async fn serve(
    addr: &str,
    app: Router,
    cancel: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), ScareBoxError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ScareBoxError::Server(format!("bind {addr} failed: {e}")))?;
    let bound = listener
        .local_addr()
        .map_err(|e| ScareBoxError::Server(format!("local_addr failed: {e}")))?;

    let task = tokio::spawn(async move {
        tracing::info!(%bound, "HTTP server started");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "HTTP server failed");
        }
        tracing::debug!("HTTP server shut down");
    });
    Ok((bound, task))
}
