//! Native PTY spawning using portable-pty.

use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, CommandBuilder};

use super::{PtySize, SharedPty};
use crate::error::PtyServerError;
use crate::shell::ResolvedShell;
use crate::Result;

/// Locale variables defaulted to UTF-8 so non-ASCII output renders.
#[cfg(unix)]
const LOCALE_VARS: [&str; 3] = ["LANG", "LC_ALL", "LC_CTYPE"];

#[cfg(unix)]
const DEFAULT_LOCALE: &str = "en_US.UTF-8";

/// Environment applied to every spawned shell.
#[derive(Debug, Clone)]
pub struct SpawnEnv {
    /// `TERM` used when the server's own environment has none.
    pub term: String,
    /// Value exported as `TERM_PROGRAM`.
    pub term_program: String,
    /// Working directory; inherited from the server when `None`.
    pub cwd: Option<PathBuf>,
}

impl Default for SpawnEnv {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            term_program: env!("CARGO_PKG_NAME").to_string(),
            cwd: None,
        }
    }
}

impl SpawnEnv {
    fn apply(&self, cmd: &mut CommandBuilder) {
        // Without TERM, full-screen programs (clear, vim) misbehave.
        let term = std::env::var("TERM")
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.term.clone());
        cmd.env("TERM", term);

        #[cfg(unix)]
        for var in LOCALE_VARS {
            if std::env::var_os(var).is_none() {
                cmd.env(var, DEFAULT_LOCALE);
            }
        }

        cmd.env("TERM_PROGRAM", &self.term_program);

        if let Some(dir) = &self.cwd {
            cmd.cwd(dir);
        }
    }
}

/// A freshly spawned shell: the shared control handle plus the pieces each
/// forwarding direction takes ownership of.
pub struct SpawnedPty {
    /// Resize/kill/release handle shared by both directions.
    pub pty: SharedPty,
    /// Blocking reader over the PTY master.
    pub reader: Box<dyn Read + Send>,
    /// Blocking writer into the PTY master.
    pub writer: Box<dyn Write + Send>,
    /// The child process; moved into the exit watcher.
    pub child: Box<dyn Child + Send + Sync>,
}

impl std::fmt::Debug for SpawnedPty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedPty")
            .field("pid", &self.pty.pid())
            .finish_non_exhaustive()
    }
}

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Spawn `shell` attached to a new PTY of the given size.
    ///
    /// This performs blocking syscalls; call it from a blocking thread.
    pub fn spawn(
        &self,
        shell: &ResolvedShell,
        size: PtySize,
        env: &SpawnEnv,
    ) -> Result<SpawnedPty> {
        let pair = self
            .pty_system
            .openpty(size.into())
            .map_err(|e| PtyServerError::Spawn(format!("openpty: {}", e)))?;

        let mut cmd = CommandBuilder::new(&shell.path);
        cmd.args(&shell.args);
        env.apply(&mut cmd);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyServerError::Spawn(format!("{}: {}", shell.path.display(), e)))?;

        // Only the child may hold the slave side, otherwise the master never
        // sees EOF when the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyServerError::Spawn(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyServerError::Spawn(e.to_string()))?;

        let pty = SharedPty::new(pair.master, child.clone_killer(), child.process_id());

        Ok(SpawnedPty {
            pty,
            reader,
            writer,
            child,
        })
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}
