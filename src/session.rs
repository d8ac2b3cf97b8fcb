//! Login session for the canteen operator.
//!
//! A single process-wide [`SessionState`] slot is filled at login and
//! emptied at logout. Components never read ambient storage for the token or
//! canteen id; they receive a [`Session`] explicitly.

use std::fmt;
use std::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{PosError, Result};

/// Auth token plus the canteen the operator is logged into.
#[derive(Clone)]
pub struct Session {
    token: Zeroizing<String>,
    canteen_id: i64,
    canteen_name: String,
}

impl Session {
    pub fn new(token: impl Into<String>, canteen_id: i64, canteen_name: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            canteen_id,
            canteen_name: canteen_name.into(),
        }
    }

    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn canteen_id(&self) -> i64 {
        self.canteen_id
    }

    pub fn canteen_name(&self) -> &str {
        &self.canteen_name
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("canteen_id", &self.canteen_id)
            .field("canteen_name", &self.canteen_name)
            .finish()
    }
}

/// The process-wide session slot.
#[derive(Default)]
pub struct SessionState {
    current: RwLock<Option<Session>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the session after a successful login, replacing any previous one.
    pub fn begin(&self, session: Session) -> Result<()> {
        let mut guard = self.current.write()?;
        info!(
            canteen_id = session.canteen_id(),
            canteen = %session.canteen_name(),
            "session started"
        );
        *guard = Some(session);
        Ok(())
    }

    /// Drop the current session. The token buffer is zeroized on drop.
    /// Returns whether a session was active.
    pub fn end(&self) -> Result<bool> {
        let mut guard = self.current.write()?;
        let had_session = guard.take().is_some();
        if had_session {
            info!("session ended");
        }
        Ok(had_session)
    }

    /// Snapshot of the active session, or `NoSession`.
    pub fn current(&self) -> Result<Session> {
        self.current.read()?.clone().ok_or(PosError::NoSession)
    }

    pub fn is_active(&self) -> bool {
        self.current.read().map(|g| g.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_end_session() {
        let state = SessionState::new();
        assert!(matches!(state.current(), Err(PosError::NoSession)));

        state
            .begin(Session::new("tok", 4, "Annapurna Canteen"))
            .unwrap();
        let session = state.current().expect("active");
        assert_eq!(session.token(), "tok");
        assert_eq!(session.canteen_id(), 4);
        assert!(state.is_active());

        assert!(state.end().unwrap());
        assert!(!state.end().unwrap());
        assert!(!state.is_active());
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new("secret-token", 1, "Main");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
