//! Authoritative map of active sessions.
//!
//! Every read and write goes through one lock, so port allocation, conflict
//! checks and status transitions are atomic with respect to each other.
//! Sessions that leave the registry are remembered: every retired id stays
//! known for the life of the process so repeated stops stay idempotent, and a
//! bounded history of final snapshots lets status lookups report the final
//! state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::types::{PortPool, Session, SessionError, SessionStatus};

/// How many final snapshots of torn-down sessions are kept. Older sessions
/// lose their `last_status` but stay in `retired_ids`.
const RETIRED_HISTORY: usize = 256;

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, Session>,
    retired: VecDeque<Session>,
    retired_ids: HashSet<String>,
}

impl RegistryState {
    fn not_found(&self, id: &str) -> SessionError {
        SessionError::NotFound {
            id: id.to_string(),
            last_status: self
                .retired
                .iter()
                .rev()
                .find(|s| s.id == id)
                .map(|s| s.status),
        }
    }

    fn check_conflicts(&self, session: &Session) -> Result<(), SessionError> {
        if self.active.contains_key(&session.id) {
            return Err(SessionError::Conflict {
                resource: format!("session id {}", session.id),
                detail: "already registered".into(),
            });
        }
        for other in self.active.values() {
            if other.port == session.port {
                return Err(SessionError::Conflict {
                    resource: format!("port {}", session.port),
                    detail: format!("held by session {}", other.id),
                });
            }
            if other.working_directory == session.working_directory {
                return Err(SessionError::Conflict {
                    resource: format!("directory {}", session.working_directory.display()),
                    detail: format!("held by session {}", other.id),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the maps half-updated:
        // every mutation is a single insert/remove.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a fully-formed session. Fails if its id, port or directory is
    /// already held by an active session.
    pub fn register(&self, session: Session) -> Result<Session, SessionError> {
        let mut state = self.lock();
        state.check_conflicts(&session)?;
        state.active.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Pick the lowest free port in `pool`, build the session around it and
    /// register it, all under one lock acquisition.
    pub fn claim<F>(&self, pool: &PortPool, build: F) -> Result<Session, SessionError>
    where
        F: FnOnce(u16) -> Session,
    {
        let mut state = self.lock();
        let held: HashSet<u16> = state.active.values().map(|s| s.port).collect();
        let port = pool
            .ports()
            .find(|p| !held.contains(p))
            .ok_or(SessionError::PortExhausted {
                base_port: pool.base,
                count: pool.count,
            })?;
        let session = build(port);
        state.check_conflicts(&session)?;
        state.active.insert(session.id.clone(), session.clone());
        debug!(session = %session.id, port, "Port claimed");
        Ok(session)
    }

    pub fn lookup(&self, id: &str) -> Result<Session, SessionError> {
        let state = self.lock();
        state
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| state.not_found(id))
    }

    /// Active sessions, oldest first.
    pub fn list_active(&self) -> Vec<Session> {
        let state = self.lock();
        let mut sessions: Vec<Session> = state.active.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Move a session to `next`, rejecting anything the lifecycle does not
    /// allow.
    pub fn transition(&self, id: &str, next: SessionStatus) -> Result<Session, SessionError> {
        let mut state = self.lock();
        let Some(session) = state.active.get_mut(id) else {
            return Err(state.not_found(id));
        };
        if !session.status.can_transition_to(next) {
            return Err(SessionError::Conflict {
                resource: format!("session {}", id),
                detail: format!("cannot move from {} to {}", session.status, next),
            });
        }
        debug!(session = %id, from = %session.status, to = %next, "Session transition");
        session.status = next;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    pub fn set_pid(&self, id: &str, pid: u32) {
        if let Some(session) = self.lock().active.get_mut(id) {
            session.pid = Some(pid);
            session.updated_at = Utc::now();
        }
    }

    /// Remove a session, releasing its port and directory claim. Calling it
    /// for an id that is not active is a no-op.
    pub fn unregister(&self, id: &str) -> Option<Session> {
        let mut state = self.lock();
        let session = state.active.remove(id)?;
        if state.retired.len() == RETIRED_HISTORY {
            state.retired.pop_front();
        }
        state.retired.push_back(session.clone());
        state.retired_ids.insert(session.id.clone());
        Some(session)
    }

    /// Whether `id` was ever registered and has since been unregistered.
    pub fn was_retired(&self, id: &str) -> bool {
        self.lock().retired_ids.contains(id)
    }

    pub fn held_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.lock().active.values().map(|s| s.port).collect();
        ports.sort_unstable();
        ports
    }
}
