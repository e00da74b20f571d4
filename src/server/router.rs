//! Router configuration.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, ws_handler, AppState};

/// Create the router.
///
/// `GET /health` answers liveness probes; every other request is treated as
/// a WebSocket upgrade for a new session.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(ws_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
