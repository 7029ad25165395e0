//! Session state machine.

use std::fmt;

/// What the session does once a tag is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Report identity only.
    #[default]
    Read,
    /// Read the target page, then write the pending text if it differs.
    Write,
    /// Zero every user page.
    Clear,
}

impl SessionMode {
    /// Clear wins over write text; empty text means a plain read.
    pub fn select(write_text: &str, clear: bool) -> Self {
        if clear {
            SessionMode::Clear
        } else if write_text.is_empty() {
            SessionMode::Read
        } else {
            SessionMode::Write
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Read => write!(f, "read"),
            SessionMode::Write => write!(f, "write"),
            SessionMode::Clear => write!(f, "clear"),
        }
    }
}

/// Lifecycle of one polling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Reader is polling for tags.
    PollingActive,
    /// Several tags were sensed; waiting before polling again.
    CollisionRetry,
    Connecting,
    Operating,
    /// Final status reported; about to return to `Idle`.
    Invalidated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::PollingActive => write!(f, "POLLING_ACTIVE"),
            SessionState::CollisionRetry => write!(f, "COLLISION_RETRY"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Operating => write!(f, "OPERATING"),
            SessionState::Invalidated => write!(f, "INVALIDATED"),
        }
    }
}

/// The single session owned by a controller.
#[derive(Debug, Default)]
pub struct Session {
    pub mode: SessionMode,
    pub pending_text: String,
    pub state: SessionState,
    /// Collision retries performed in this session.
    pub collision_retries: u32,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state != SessionState::Idle
    }

    /// Whether an external invalidation still has work to stop.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self.state,
            SessionState::PollingActive
                | SessionState::CollisionRetry
                | SessionState::Connecting
                | SessionState::Operating
        )
    }

    /// Claim the session for a new request. Returns false if one is running.
    pub fn begin(&mut self, mode: SessionMode, pending_text: &str) -> bool {
        if self.is_active() {
            return false;
        }
        self.mode = mode;
        self.pending_text = pending_text.to_string();
        self.collision_retries = 0;
        self.goto_state(SessionState::PollingActive);
        true
    }

    /// Transition to a new state.
    pub fn goto_state(&mut self, new_state: SessionState) {
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    /// Forget the request so the next start is clean.
    pub fn reset(&mut self) {
        self.mode = SessionMode::Read;
        self.pending_text.clear();
        self.collision_retries = 0;
        if self.state != SessionState::Idle {
            self.goto_state(SessionState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        assert_eq!(SessionMode::select("", false), SessionMode::Read);
        assert_eq!(SessionMode::select("ab", false), SessionMode::Write);
        assert_eq!(SessionMode::select("ab", true), SessionMode::Clear);
        assert_eq!(SessionMode::select("", true), SessionMode::Clear);
    }

    #[test]
    fn test_single_active_session() {
        let mut session = Session::new();
        assert!(session.begin(SessionMode::Write, "abcd"));
        assert!(session.is_active());
        assert!(!session.begin(SessionMode::Read, ""));
        assert_eq!(session.pending_text, "abcd");

        assert!(session.is_cancellable());
        session.goto_state(SessionState::Invalidated);
        assert!(session.is_active());
        assert!(!session.is_cancellable());
        session.reset();
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.mode, SessionMode::Read);
        assert!(session.pending_text.is_empty());
        assert!(session.begin(SessionMode::Clear, ""));
    }
}
