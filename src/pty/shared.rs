//! Shared PTY control handle.
//!
//! Both forwarding directions of a session hold an `Arc<SharedPty>`. All
//! teardown operations are take-once, so invoking them repeatedly (or from
//! both directions) never double-kills or double-closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::{Child, ChildKiller, MasterPty};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::PtySize;
use crate::error::PtyServerError;
use crate::Result;

/// What is known about the shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Still running (or not yet reaped).
    Running,
    /// Exited and reaped with this code.
    Exited(i32),
    /// Waiting on the process failed; the status is not observable.
    Unknown,
}

impl ChildStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ChildStatus::Running)
    }

    /// Exit code, if one was observed.
    pub fn code(&self) -> Option<i32> {
        match self {
            ChildStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

/// Reference-counted control handle over one PTY master and its child.
pub struct SharedPty {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    pid: Option<u32>,
    exited: AtomicBool,
}

/// Recover the guard even if a previous holder panicked; teardown must run.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SharedPty {
    pub(crate) fn new(
        master: Box<dyn MasterPty + Send>,
        killer: Box<dyn ChildKiller + Send + Sync>,
        pid: Option<u32>,
    ) -> Self {
        Self {
            master: Mutex::new(Some(master)),
            killer: Mutex::new(Some(killer)),
            pid,
            exited: AtomicBool::new(false),
        }
    }

    /// Process ID of the shell, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Apply a new window size. Blocking: a single size-update syscall.
    pub fn resize(&self, size: PtySize) -> Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        let master = master
            .as_ref()
            .ok_or_else(|| PtyServerError::Pty("PTY already released".into()))?;
        master
            .resize(size.into())
            .map_err(|e| PtyServerError::Pty(format!("resize: {}", e)))
    }

    /// Current window size as reported by the OS.
    pub fn size(&self) -> Result<PtySize> {
        let master = self
            .master
            .lock()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        let master = master
            .as_ref()
            .ok_or_else(|| PtyServerError::Pty("PTY already released".into()))?;
        master
            .get_size()
            .map(PtySize::from)
            .map_err(|e| PtyServerError::Pty(format!("get_size: {}", e)))
    }

    /// Record that the child has been reaped.
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Forcibly terminate the child if it is still alive.
    ///
    /// Returns `true` only for the call that actually delivered the kill.
    pub fn kill(&self) -> bool {
        let Some(mut killer) = relock(&self.killer).take() else {
            return false;
        };
        if self.has_exited() {
            return false;
        }
        match killer.kill() {
            Ok(()) => {
                debug!(pid = ?self.pid, "shell killed");
                true
            }
            Err(e) => {
                // Typically the child exited between the check and the kill.
                debug!(pid = ?self.pid, error = %e, "kill failed");
                false
            }
        }
    }

    /// Escalate to `SIGKILL` for a shell that survived [`kill`](Self::kill).
    #[cfg(unix)]
    pub fn force_kill(&self) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        if self.has_exited() || pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        warn!(pid, "shell ignored hangup, sending SIGKILL");
        // SAFETY: signal delivery only; the PID belongs to our unreaped child.
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) == 0 }
    }

    #[cfg(not(unix))]
    pub fn force_kill(&self) -> bool {
        false
    }

    /// Close the PTY master. Returns `true` only for the first call.
    pub fn release(&self) -> bool {
        relock(&self.master).take().is_some()
    }

    pub fn is_released(&self) -> bool {
        relock(&self.master).is_none()
    }

    /// Reap `child` on a blocking thread, publishing its status.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_exit(
        self: &Arc<Self>,
        mut child: Box<dyn Child + Send + Sync>,
    ) -> watch::Receiver<ChildStatus> {
        let (tx, rx) = watch::channel(ChildStatus::Running);
        let pty = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let status = match child.wait() {
                Ok(status) => ChildStatus::Exited(status.exit_code() as i32),
                Err(e) => {
                    warn!(pid = ?pty.pid, error = %e, "failed to wait for shell");
                    ChildStatus::Unknown
                }
            };
            pty.mark_exited();
            debug!(pid = ?pty.pid, ?status, "shell reaped");
            let _ = tx.send(status);
        });
        rx
    }
}

impl std::fmt::Debug for SharedPty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPty")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::pty::{NativePty, SpawnEnv};
    use crate::shell::ResolvedShell;
    use std::path::PathBuf;
    use std::time::Duration;

    fn sh(script: &str) -> ResolvedShell {
        ResolvedShell {
            path: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[tokio::test]
    async fn test_exit_code_observed() {
        let spawned = NativePty::new()
            .spawn(&sh("exit 7"), PtySize::default(), &SpawnEnv::default())
            .unwrap();
        let pty = Arc::new(spawned.pty);
        let mut rx = pty.watch_exit(spawned.child);

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| !s.is_running()),
        )
        .await
        .expect("shell did not exit")
        .map(|s| *s)
        .unwrap();

        assert_eq!(status, ChildStatus::Exited(7));
        assert!(pty.has_exited());
        // Nothing left to kill once reaped.
        assert!(!pty.kill());
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let spawned = NativePty::new()
            .spawn(&sh("sleep 30"), PtySize::default(), &SpawnEnv::default())
            .unwrap();
        let pty = Arc::new(spawned.pty);
        let mut rx = pty.watch_exit(spawned.child);

        assert!(pty.kill());
        assert!(!pty.kill());

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| !s.is_running()),
        )
        .await
        .expect("killed shell was not reaped")
        .map(|s| *s)
        .unwrap();
        assert!(!status.is_running());
    }

    #[test]
    fn test_resize_and_release() {
        let spawned = NativePty::new()
            .spawn(&sh("sleep 30"), PtySize::default(), &SpawnEnv::default())
            .unwrap();
        let pty = spawned.pty;

        pty.resize(PtySize::new(40, 100)).unwrap();
        assert_eq!(pty.size().unwrap(), PtySize::new(40, 100));

        assert!(pty.release());
        assert!(!pty.release());
        assert!(pty.is_released());
        assert!(matches!(
            pty.resize(PtySize::default()),
            Err(PtyServerError::Pty(_))
        ));
        pty.kill();
    }

    #[test]
    fn test_child_status_code() {
        assert_eq!(ChildStatus::Exited(3).code(), Some(3));
        assert_eq!(ChildStatus::Running.code(), None);
        assert_eq!(ChildStatus::Unknown.code(), None);
        assert!(ChildStatus::Running.is_running());
    }
}
