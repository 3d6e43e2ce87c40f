use crate::config::SyncConfig;
use crate::error::SessionError;
use crate::session::coordinator::{SessionHandle, spawn_session};
use crate::session::{ClientId, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

/// All live sessions in this process. Sessions are independent: each one is
/// served by its own coordinator thread, the registry only maps ids to
/// handles.
pub struct SessionRegistry {
    config: SyncConfig,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session with `host` recorded as its host member.
    pub fn create(&self, session_id: &str, host: ClientId) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return Err(SessionError::SessionExists(session_id.to_string()));
        }
        let handle = spawn_session(session_id.to_string(), host, &self.config);
        sessions.insert(session_id.to_string(), handle.clone());
        info!(session = session_id, host, "session created");
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Remove a session and stop its coordinator.
    pub fn remove(&self, session_id: &str) -> bool {
        match self.sessions.write().remove(session_id) {
            Some(handle) => {
                handle.shutdown();
                info!(session = session_id, "session removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
