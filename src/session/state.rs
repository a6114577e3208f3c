//! Session state machine
//!
//! ```text
//!            start                first data
//! Stopped ─────────► Starting ─────────────────► Running
//!    ▲                 │  │                        │  │
//!    │ launch failed   │  │ exit / no data         │  │ stop
//!    ├─────────────────┘  ▼                        │  ▼
//!    │                 Crashed ◄───────────────────┘ Stopping ──► Stopped
//!    │  policy exhausted │  │ exit / no data          ▲
//!    └───────────────────┘  ▼                         │
//!                        Restarting ──────────────────┘ stop
//!                           │
//!                           └──► Starting
//! ```
//!
//! `Stopped` is terminal for a session object; a new start on the same URL
//! creates a new session.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No decoder process; initial and terminal state
    Stopped,
    /// Decoder launched, no data yet
    Starting,
    /// Decoder is producing audio
    Running,
    /// Stop requested, decoder being terminated
    Stopping,
    /// Decoder exited or went silent while it should be running
    Crashed,
    /// Waiting out the restart delay
    Restarting,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Crashed)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Crashed, Restarting)
                | (Crashed, Stopped)
                | (Restarting, Starting)
                | (Restarting, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Whether the session belongs in the registry
    pub fn is_active(self) -> bool {
        self != SessionState::Stopped
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Crashed => "crashed",
            SessionState::Restarting => "restarting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable holder of a session's state
///
/// Transitions are validated; an illegal transition leaves the state
/// unchanged. Observers can wait for specific states via [`subscribe`].
///
/// [`subscribe`]: StateCell::subscribe
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<SessionState>,
}

impl StateCell {
    /// Create a cell in the `Stopped` state
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Stopped);
        Self { tx }
    }

    /// Current state
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Attempt a transition; returns whether it was applied
    pub fn transition(&self, next: SessionState) -> bool {
        let mut from = next;
        let applied = self.tx.send_if_modified(|current| {
            from = *current;
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if !applied && from != next {
            tracing::trace!(from = %from, to = %next, "Ignored invalid session transition");
        }
        applied
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_session_lifecycle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), Stopped);

        assert!(cell.transition(Starting));
        assert!(cell.transition(Running));
        assert!(cell.transition(Stopping));
        assert!(cell.transition(Stopped));
        assert_eq!(cell.get(), Stopped);
    }

    #[test]
    fn test_crash_and_restart() {
        let cell = StateCell::new();
        cell.transition(Starting);
        cell.transition(Running);

        assert!(cell.transition(Crashed));
        assert!(cell.transition(Restarting));
        assert!(cell.transition(Starting));
        assert!(cell.transition(Running));
    }

    #[test]
    fn test_crash_exhausted_goes_stopped() {
        let cell = StateCell::new();
        cell.transition(Starting);
        cell.transition(Crashed);

        assert!(cell.transition(Stopped));
        assert!(!cell.get().is_active());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let cell = StateCell::new();

        assert!(!cell.transition(Running));
        assert!(!cell.transition(Crashed));
        assert!(!cell.transition(Stopping));
        assert_eq!(cell.get(), Stopped);

        cell.transition(Starting);
        cell.transition(Running);
        cell.transition(Stopping);

        // A stopping session cannot come back to life
        assert!(!cell.transition(Running));
        assert!(!cell.transition(Crashed));
        assert!(!cell.transition(Restarting));
        assert_eq!(cell.get(), Stopping);
    }

    #[test]
    fn test_stop_during_restart_delay() {
        let cell = StateCell::new();
        cell.transition(Starting);
        cell.transition(Crashed);
        cell.transition(Restarting);

        assert!(cell.transition(Stopping));
        assert!(cell.transition(Stopped));
    }

    #[test]
    fn test_only_stopped_is_inactive() {
        for state in [Starting, Running, Stopping, Crashed, Restarting] {
            assert!(state.is_active(), "{state} should be active");
        }
        assert!(!Stopped.is_active());
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();

        cell.transition(Starting);
        cell.transition(Running);

        let state = *rx.wait_for(|s| *s == Running).await.unwrap();
        assert_eq!(state, Running);
    }

    #[test]
    fn test_display() {
        assert_eq!(Restarting.to_string(), "restarting");
        assert_eq!(Running.as_str(), "running");
    }
}
