//! Session lifecycle state machine.

/// Lifecycle state of a terminal session.
///
/// ```text
/// Starting ──> Running ──> Closing ──> Closed
///     └──────────────────────^
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Upgrade accepted; resolving and spawning the shell.
    #[default]
    Starting,
    /// Shell attached; both forwarding directions active.
    Running,
    /// A termination trigger fired; cleanup in progress.
    Closing,
    /// Cleanup complete. Terminal: no transitions out.
    Closed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Starting, Running) | (Starting, Closing) | (Running, Closing) | (Closing, Closed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns an error and leaves the state unchanged if the transition
    /// is not valid.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::PtyServerError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether teardown has begun (or finished).
    pub fn is_closing(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}
