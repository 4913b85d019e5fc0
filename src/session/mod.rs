//! Engine session lifecycle.
//!
//! - `registry` -- authoritative map of active sessions, port allocation
//! - `process`  -- engine process collaborator (spawn, signal, readiness)
//! - `manager`  -- create/stop/observe/reap orchestration
//! - `types`    -- session snapshot, status and errors

pub mod manager;
pub mod process;
pub mod registry;
pub mod types;

pub use manager::{SessionConfig, SessionManager};
pub use process::{EngineLauncher, ProcessLauncher, ReadinessKind};
pub use registry::SessionRegistry;
pub use types::{PortPool, Session, SessionError, SessionStatus};
