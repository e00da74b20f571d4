//! Session management module.
//!
//! A session binds one WebSocket to one shell running on a PTY. This module
//! provides session identification, the lifecycle state machine, the
//! forwarding loops, and the registry of live sessions.

mod forward;
mod id;
mod lifecycle;
mod registry;
mod state;

pub use forward::{classify, pump_input, pump_output, ClientFrame, OutputTiming, Termination};
pub use id::SessionId;
pub use lifecycle::{Session, SessionConfig};
pub use registry::{SessionHandle, SessionRegistry};
pub use state::SessionState;
