//! Error types for pty-server.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for pty-server operations.
#[derive(Error, Debug)]
pub enum PtyServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// No shell candidate exists on this host.
    #[error("no shell available (tried: {})", tried.join(", "))]
    NoShellAvailable { tried: Vec<String> },

    /// The shell could not be spawned on a new PTY.
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    /// PTY-related error after spawn (resize, read, write).
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Session with the given ID is already registered.
    #[error("session already registered: {0}")]
    SessionExists(String),

    /// The registry no longer accepts sessions (shutdown in progress).
    #[error("session registry is closed")]
    RegistryClosed,

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Convenience Result type for pty-server operations.
pub type Result<T> = std::result::Result<T, PtyServerError>;
