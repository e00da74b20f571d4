//! Registry of live sessions.
//!
//! The registry is only used for counting and shutdown enumeration; nothing
//! routes through it. Each session holds an `Arc<SessionHandle>` and the
//! registry holds another, so shutdown can reach a session without owning it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{SessionId, SessionState};
use crate::error::PtyServerError;
use crate::pty::PtySize;
use crate::Result;

/// Control block shared between a running session and the registry.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    created_at: Instant,
    state: Mutex<SessionState>,
    size: Mutex<PtySize>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle in the `Starting` state.
    pub fn new(id: SessionId, size: PtySize) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            state: Mutex::new(SessionState::Starting),
            size: Mutex::new(size),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Time since the upgrade was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }

    /// Apply a state transition.
    pub fn transition(&self, target: SessionState) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        let from = *state;
        state.transition_to(target)?;
        debug!(session = %self.id, ?from, to = ?target, "state transition");
        Ok(())
    }

    /// Last dimensions applied to the PTY.
    pub fn size(&self) -> PtySize {
        self.size.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn set_size(&self, size: PtySize) {
        if let Ok(mut current) = self.size.lock() {
            *current = size;
        }
    }

    /// Token cancelled when the session must stop forwarding.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the session to tear itself down.
    pub fn request_close(&self) {
        self.cancel.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Enter `Closing` (if not already there) and cancel forwarding.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn begin_close(&self) -> bool {
        let moved = match self.state.lock() {
            Ok(mut state) if !state.is_closing() => {
                let from = *state;
                let moved = state.transition_to(SessionState::Closing).is_ok();
                if moved {
                    debug!(session = %self.id, ?from, "closing");
                }
                moved
            }
            _ => false,
        };
        self.cancel.cancel();
        moved
    }
}

/// Thread-safe map of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    closed: AtomicBool,
    removed: Notify,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            removed: Notify::new(),
        }
    }

    /// Register a session.
    ///
    /// Fails if the id is already present or shutdown has started.
    pub fn insert(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| PtyServerError::LockPoisoned)?;

        // Checked under the write lock so close_all cannot miss a late insert.
        if self.closed.load(Ordering::Acquire) {
            return Err(PtyServerError::RegistryClosed);
        }
        if sessions.contains_key(&handle.id()) {
            return Err(PtyServerError::SessionExists(handle.id().to_string()));
        }
        sessions.insert(handle.id(), handle);
        Ok(())
    }

    /// Remove a session. Removing an absent id is a no-op returning `None`.
    pub fn remove(&self, id: &SessionId) -> Result<Option<Arc<SessionHandle>>> {
        let removed = self
            .sessions
            .write()
            .map_err(|_| PtyServerError::LockPoisoned)?
            .remove(id);
        if removed.is_some() {
            self.removed.notify_waiters();
        }
        Ok(removed)
    }

    /// Get the handle of a live session.
    pub fn get(&self, id: &SessionId) -> Result<Option<Arc<SessionHandle>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        Ok(sessions.get(id).cloned())
    }

    /// Check if a session is registered.
    pub fn contains(&self, id: &SessionId) -> Result<bool> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        Ok(sessions.contains_key(id))
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Number of registered sessions currently in `state`.
    pub fn count_in(&self, state: SessionState) -> usize {
        self.sessions
            .read()
            .map(|s| s.values().filter(|h| h.state() == state).count())
            .unwrap_or(0)
    }

    /// List all session IDs.
    pub fn list_ids(&self) -> Result<Vec<SessionId>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| PtyServerError::LockPoisoned)?;
        Ok(sessions.keys().copied().collect())
    }

    /// Whether shutdown has started.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new sessions and request closure of every live one.
    ///
    /// Returns the number of sessions asked to close.
    pub fn close_all(&self) -> usize {
        let handles: Vec<_> = match self.sessions.write() {
            Ok(sessions) => {
                self.closed.store(true, Ordering::Release);
                sessions.values().cloned().collect()
            }
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                return 0;
            }
        };

        for handle in &handles {
            handle.request_close();
        }
        info!(sessions = handles.len(), "closing all sessions");
        handles.len()
    }

    /// Wait until no sessions remain, up to `timeout`.
    ///
    /// Returns `true` if the registry drained in time.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, or a remove in between is lost.
            let notified = self.removed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() == 0;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("count", &self.count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
