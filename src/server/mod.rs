//! WebSocket server.
//!
//! Binds a loopback port, announces it, and serves one session per
//! accepted WebSocket connection until shutdown.
//!
//! ## Example
//!
//! ```no_run
//! use pty_server::server::{announce_port, shutdown_signal, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> pty_server::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     announce_port(std::io::stdout(), server.port())?;
//!     server.run(shutdown_signal()).await
//! }
//! ```

mod handlers;
mod router;

use std::future::Future;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use handlers::AppState;
pub use router::create_router;

use crate::error::PtyServerError;
use crate::session::{SessionConfig, SessionRegistry};
use crate::Result;

/// Runtime server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Loopback port to listen on; 0 lets the OS choose.
    pub port: u16,
    /// How long shutdown waits for sessions to close.
    pub shutdown_grace: Duration,
    /// Settings applied to every session.
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Address the server binds to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            shutdown_grace: Duration::from_secs(3),
            session: SessionConfig::default(),
        }
    }
}

/// The single line written to stdout once the port is bound.
#[derive(Debug, Serialize)]
struct PortAnnouncement {
    port: u16,
    pid: u32,
}

/// Write the port announcement line and flush.
pub fn announce_port<W: Write>(mut writer: W, port: u16) -> Result<()> {
    let line = serde_json::to_string(&PortAnnouncement {
        port,
        pid: std::process::id(),
    })
    .map_err(|e| PtyServerError::Io(e.into()))?;
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
}

/// A bound, not yet serving, server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
    shutdown_grace: Duration,
}

impl Server {
    /// Bind the loopback listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| PtyServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            state: AppState::new(config.session),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Registry of this server's live sessions.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Serve until `shutdown` resolves, then close every session.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(&self.state.registry);
        let router = create_router(self.state);

        info!(addr = %self.local_addr, "listening for connections");

        let closing = Arc::clone(&registry);
        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown requested");
                // Upgraded sockets outlive the HTTP connection; stop them here.
                closing.close_all();
            })
            .await
            .map_err(PtyServerError::Io)?;

        if registry.wait_until_empty(self.shutdown_grace).await {
            info!("all sessions closed");
        } else {
            warn!(
                remaining = registry.count(),
                "sessions still open after grace period"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("registry", &self.state.registry)
            .finish()
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
