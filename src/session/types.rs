use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an engine session.
///
/// Transitions only move forward (Starting → Running → Stopping → Stopped);
/// `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Starting, Running) | (Running, Stopping) | (Stopping, Stopped) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Starting => "Starting",
            SessionStatus::Running => "Running",
            SessionStatus::Stopping => "Stopping",
            SessionStatus::Stopped => "Stopped",
            SessionStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of one engine session as held by the registry.
///
/// The process handle is not part of the snapshot; the lifecycle manager
/// owns it exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub port: u16,
    pub working_directory: PathBuf,
    /// `true` when the directory was created for this session and is removed
    /// on teardown.
    pub owns_directory: bool,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

/// Contiguous range of ports sessions may bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPool {
    pub base: u16,
    pub count: u16,
}

impl PortPool {
    pub fn new(base: u16, count: u16) -> Self {
        Self { base, count }
    }

    /// Ports in ascending order, clipped at `u16::MAX`.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        let end = (self.base as u32 + self.count as u32).min(u16::MAX as u32 + 1);
        (self.base as u32..end).map(|p| p as u16)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{id}' not found{}", describe_last_status(last_status))]
    NotFound {
        id: String,
        last_status: Option<SessionStatus>,
    },

    #[error("{resource} is already in use: {detail}")]
    Conflict { resource: String, detail: String },

    #[error("no free port in pool {base_port}..{}", *base_port as u32 + *count as u32)]
    PortExhausted { base_port: u16, count: u16 },

    #[error("working directory {}: {reason}", path.display())]
    Directory { path: PathBuf, reason: String },

    #[error("engine for session '{session_id}' failed to start: {reason}")]
    ProcessSpawn { session_id: String, reason: String },
}

fn describe_last_status(last: &Option<SessionStatus>) -> String {
    match last {
        Some(status) => format!(" (no longer active, last status: {})", status),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        use SessionStatus::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Starting.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Running));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use SessionStatus::*;
        for from in [Starting, Running, Stopping] {
            assert!(from.can_transition_to(Failed), "{from} -> Failed");
        }
        assert!(!Stopped.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_port_pool_clips_at_max() {
        let pool = PortPool::new(65534, 5);
        assert_eq!(pool.ports().collect::<Vec<_>>(), vec![65534, 65535]);
        assert_eq!(PortPool::new(8888, 3).ports().collect::<Vec<_>>(), vec![8888, 8889, 8890]);
    }

    #[test]
    fn test_not_found_message_mentions_last_status() {
        let err = SessionError::NotFound {
            id: "s1".into(),
            last_status: Some(SessionStatus::Failed),
        };
        assert_eq!(
            err.to_string(),
            "session 's1' not found (no longer active, last status: Failed)"
        );
    }
}
