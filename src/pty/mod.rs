//! PTY (pseudo-terminal) layer.
//!
//! Spawns shells on native pseudo-terminals (Unix PTY / Windows ConPTY via
//! `portable-pty`) and bridges their blocking I/O onto the tokio runtime.

mod async_adapter;
mod native;
mod shared;

pub use async_adapter::{AsyncPtyReader, AsyncPtyWriter, DEFAULT_BUFFER_SIZE};
pub use native::{NativePty, SpawnEnv, SpawnedPty};
pub use shared::{ChildStatus, SharedPty};

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<PtySize> for portable_pty::PtySize {
    fn from(size: PtySize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl From<portable_pty::PtySize> for PtySize {
    fn from(size: portable_pty::PtySize) -> Self {
        Self::new(size.rows, size.cols)
    }
}
