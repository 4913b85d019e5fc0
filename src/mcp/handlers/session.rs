//! Session tool handlers: create_session, get_session, list_sessions,
//! stop_session, get_session_output.

use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::info;

use super::{optional_str, optional_usize, required_str, McpToolResult};
use crate::session::SessionManager;

const DEFAULT_OUTPUT_LINES: usize = 50;

pub async fn handle_create_session(args: &Value, sessions: &SessionManager) -> McpToolResult {
    let requested = match optional_str(args, "working_directory") {
        Ok(dir) => dir.map(PathBuf::from),
        Err(result) => return result,
    };
    match sessions.create_session(requested).await {
        Ok(session) => {
            info!("[MCP] Session {} running on port {}", session.id, session.port);
            McpToolResult::json(&session)
        }
        Err(e) => McpToolResult::failure(&e),
    }
}

pub async fn handle_get_session(args: &Value, sessions: &SessionManager) -> McpToolResult {
    let id = match required_str(args, "session_id") {
        Ok(id) => id,
        Err(result) => return result,
    };
    match sessions.get_status(id) {
        Ok(session) => McpToolResult::json(&session),
        Err(e) => McpToolResult::failure(&e),
    }
}

pub async fn handle_list_sessions(_args: &Value, sessions: &SessionManager) -> McpToolResult {
    let list = sessions.list_sessions();
    McpToolResult::json(&json!({
        "count": list.len(),
        "sessions": list,
    }))
}

pub async fn handle_stop_session(args: &Value, sessions: &SessionManager) -> McpToolResult {
    let id = match required_str(args, "session_id") {
        Ok(id) => id,
        Err(result) => return result,
    };
    match sessions.stop_session(id).await {
        Ok(()) => McpToolResult::json(&json!({
            "session_id": id,
            "stopped": true,
        })),
        Err(e) => McpToolResult::failure(&e),
    }
}

pub async fn handle_get_session_output(args: &Value, sessions: &SessionManager) -> McpToolResult {
    let id = match required_str(args, "session_id") {
        Ok(id) => id,
        Err(result) => return result,
    };
    let limit = match optional_usize(args, "lines") {
        Ok(limit) => limit.unwrap_or(DEFAULT_OUTPUT_LINES),
        Err(result) => return result,
    };
    match sessions.session_output(id, limit).await {
        Ok(lines) => McpToolResult::json(&json!({
            "session_id": id,
            "lines": lines,
        })),
        Err(e) => McpToolResult::failure(&e),
    }
}
