//! Registry of user-visible sessions and the active-session pointer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use ptydeck_core::error::ApiError;
use ptydeck_core::session::{Session, SessionId};
use tracing::{debug, info};

use crate::host::session::PtySession;

/// Maximum number of sessions to prevent resource exhaustion.
pub const MAX_SESSIONS: usize = 64;

/// Sessions in launch order, their PTY handles, and which one is active.
///
/// Not synchronised itself; the workspace keeps it behind a mutex.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    ptys: HashMap<SessionId, Arc<PtySession>>,
    active: Option<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new running session. Nothing is spawned.
    pub fn create(
        &mut self,
        command: impl Into<String>,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    ) -> Result<Session, ApiError> {
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(ApiError::session_limit_reached(MAX_SESSIONS));
        }
        let session = Session::new(command, args, cwd);
        info!("Created session {} ({})", session.id, session.label());
        self.sessions.push(session.clone());
        Ok(session)
    }

    /// Pair a session with its PTY handle. At most one handle per session.
    pub fn attach(&mut self, id: &SessionId, pty: Arc<PtySession>) -> bool {
        if !self.contains(id) || self.ptys.contains_key(id) {
            return false;
        }
        self.ptys.insert(id.clone(), pty);
        true
    }

    pub fn pty(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.ptys.get(id).cloned()
    }

    /// Move the active pointer. Unknown ids are rejected.
    ///
    /// Only the pointer changes: no process is killed and nothing is
    /// disposed, whichever session loses focus.
    pub fn set_active(&mut self, id: Option<&SessionId>) -> bool {
        match id {
            Some(id) if !self.contains(id) => false,
            _ => {
                self.active = id.cloned();
                true
            }
        }
    }

    pub fn active_id(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// Kill the session's process, then delete the record.
    ///
    /// When the active session is removed the pointer moves to the first
    /// remaining session, or to none.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| &s.id == id)?;

        if let Some(pty) = self.ptys.remove(id) {
            pty.kill();
        }
        let session = self.sessions.remove(index);

        if self.active.as_ref() == Some(id) {
            self.active = self.sessions.first().map(|s| s.id.clone());
            debug!("Active session moved to {:?}", self.active);
        }
        info!("Removed session {}", id);
        Some(session)
    }

    pub fn rename(&mut self, id: &SessionId, label: &str) -> Result<(), ApiError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ApiError::invalid_input("Session name cannot be empty"));
        }
        let session = self
            .get_mut(id)
            .ok_or_else(|| ApiError::session_not_found(id.as_str()))?;
        session.display_name = Some(label.to_string());
        Ok(())
    }

    /// Transition to `Ended` and drop the PTY handle. False if already ended
    /// or unknown.
    pub fn mark_ended(&mut self, id: &SessionId) -> bool {
        self.ptys.remove(id);
        match self.get_mut(id) {
            Some(session) => session.end(Utc::now()),
            None => false,
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.get(id).is_some()
    }

    /// Sessions in launch order.
    pub fn list(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Take every PTY handle, leaving the records in place.
    pub fn drain_ptys(&mut self) -> Vec<Arc<PtySession>> {
        self.ptys.drain().map(|(_, pty)| pty).collect()
    }
}
