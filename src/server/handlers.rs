//! HTTP and WebSocket handlers.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::session::{Session, SessionConfig, SessionRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub session_config: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(session_config: SessionConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            session_config: Arc::new(session_config),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// Accept a WebSocket upgrade on any path and start a session on it.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.registry.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    ws.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            match Session::create(state.registry, state.session_config) {
                Ok(session) => {
                    debug!(session = %session.id(), "connection accepted");
                    session.run(socket).await;
                }
                Err(e) => warn!(error = %e, "rejecting connection"),
            }
        })
}
