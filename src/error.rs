//! Error taxonomy shared by every tool verb.
//!
//! Each subsystem owns a `thiserror` enum (`SessionError`, `VolumeError`,
//! `StorageError`). Tool results only ever expose one of the kinds below, so
//! clients can branch on a stable name instead of parsing messages.

use serde::Serialize;
use serde_json::{json, Value};

use crate::db::StorageError;
use crate::session::SessionError;
use crate::volumes::VolumeError;

/// Named failure kinds surfaced to MCP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    ConflictError,
    PortExhaustionError,
    DirectoryError,
    ProcessSpawnError,
    PathNotFoundError,
    StorageError,
    InvalidArguments,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ConflictError => "ConflictError",
            ErrorKind::PortExhaustionError => "PortExhaustionError",
            ErrorKind::DirectoryError => "DirectoryError",
            ErrorKind::ProcessSpawnError => "ProcessSpawnError",
            ErrorKind::PathNotFoundError => "PathNotFoundError",
            ErrorKind::StorageError => "StorageError",
            ErrorKind::InvalidArguments => "InvalidArguments",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can be rendered as a tool failure payload.
pub trait ToolFailure: std::fmt::Display {
    /// The client-visible kind.
    fn kind(&self) -> ErrorKind;

    /// Extra fields (session id, path, port...) merged into the payload.
    fn context(&self) -> Value {
        json!({})
    }

    /// Full JSON payload: `{"error": kind, "message": ..., ...context}`.
    fn to_payload(&self) -> Value {
        let mut payload = json!({
            "error": self.kind().as_str(),
            "message": self.to_string(),
        });
        if let (Some(obj), Value::Object(ctx)) = (payload.as_object_mut(), self.context()) {
            for (k, v) in ctx {
                obj.insert(k, v);
            }
        }
        payload
    }
}

impl ToolFailure for StorageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::StorageError
    }
}

impl ToolFailure for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound { .. } => ErrorKind::NotFound,
            SessionError::Conflict { .. } => ErrorKind::ConflictError,
            SessionError::PortExhausted { .. } => ErrorKind::PortExhaustionError,
            SessionError::Directory { .. } => ErrorKind::DirectoryError,
            SessionError::ProcessSpawn { .. } => ErrorKind::ProcessSpawnError,
        }
    }

    fn context(&self) -> Value {
        match self {
            SessionError::NotFound { id, last_status } => json!({
                "sessionId": id,
                "lastStatus": last_status,
            }),
            SessionError::Conflict { resource, .. } => json!({ "resource": resource }),
            SessionError::PortExhausted { base_port, count } => json!({
                "basePort": base_port,
                "portCount": count,
            }),
            SessionError::Directory { path, .. } => json!({ "path": path.display().to_string() }),
            SessionError::ProcessSpawn { session_id, .. } => json!({ "sessionId": session_id }),
        }
    }
}

impl ToolFailure for VolumeError {
    fn kind(&self) -> ErrorKind {
        match self {
            VolumeError::PathNotFound { .. } => ErrorKind::PathNotFoundError,
            VolumeError::NotFound { .. } => ErrorKind::NotFound,
            VolumeError::InvalidFilter(_) | VolumeError::InvalidArgument(_) => {
                ErrorKind::InvalidArguments
            }
            VolumeError::Storage(_) => ErrorKind::StorageError,
        }
    }

    fn context(&self) -> Value {
        match self {
            VolumeError::PathNotFound { path } => json!({ "path": path }),
            VolumeError::NotFound { root_path, relative_path } => json!({
                "rootPath": root_path,
                "relativePath": relative_path,
            }),
            VolumeError::InvalidFilter(_)
            | VolumeError::InvalidArgument(_)
            | VolumeError::Storage(_) => json!({}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    #[test]
    fn test_payload_carries_kind_and_context() {
        let err = SessionError::NotFound {
            id: "abc".into(),
            last_status: Some(SessionStatus::Stopped),
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"], "NotFound");
        assert_eq!(payload["sessionId"], "abc");
        assert_eq!(payload["lastStatus"], "Stopped");
        assert!(payload["message"].as_str().unwrap().contains("abc"));
    }

    #[test]
    fn test_volume_error_kinds() {
        let err = VolumeError::PathNotFound { path: "/nope".into() };
        assert_eq!(err.kind(), ErrorKind::PathNotFoundError);
        assert_eq!(err.to_payload()["path"], "/nope");

        let err = VolumeError::Storage(StorageError::new("disk full"));
        assert_eq!(err.kind(), ErrorKind::StorageError);
    }
}
