//! # pty-server
//!
//! Serve interactive shells over WebSocket on the loopback interface.
//!
//! Each accepted WebSocket connection gets its own shell attached to a real
//! pseudo-terminal (Unix PTY or Windows ConPTY). Keystrokes, output and
//! window-size changes travel as small JSON messages:
//!
//! | direction     | message                               |
//! |---------------|---------------------------------------|
//! | client→server | `{"type":"input","data":"ls\n"}`      |
//! | client→server | `{"type":"resize","cols":100,"rows":40}` |
//! | server→client | `{"type":"output","data":"..."}`      |
//! | server→client | `{"type":"exit","code":0}`            |
//!
//! ## Features
//!
//! - **Cross-platform PTY**: Unified interface for Windows ConPTY and Unix PTY
//! - **Async I/O**: Blocking PTY calls run off the async runtime
//! - **Isolated sessions**: One shell per connection, deterministic cleanup
//! - **Launcher friendly**: The bound port is announced as one JSON line on stdout
//!
//! ## Quick Start
//!
//! ```no_run
//! use pty_server::{announce_port, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> pty_server::Result<()> {
//!     pty_server::logging::try_init("info", true).ok();
//!
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     announce_port(std::io::stdout(), server.port())?;
//!
//!     server.run(pty_server::server::shutdown_signal()).await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod session;
pub mod shell;

// Re-export commonly used types
pub use config::Config;
pub use error::{PtyServerError, Result};
pub use protocol::Message;
pub use pty::{NativePty, PtySize, SharedPty};
pub use server::{announce_port, Server, ServerConfig};
pub use session::{Session, SessionConfig, SessionId, SessionRegistry, SessionState};
pub use shell::{ResolvedShell, ShellChoice, ShellResolver};
