//! Tool definitions advertised through `tools/list`.

use serde::Serialize;
use serde_json::{json, Value};

/// One MCP tool: name, human description and JSON schema of its arguments.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn tool(name: &'static str, description: &'static str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

fn no_args() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn session_id_only() -> Value {
    json!({
        "type": "object",
        "properties": {
            "session_id": { "type": "string", "description": "Session id returned by create_session" }
        },
        "required": ["session_id"]
    })
}

/// Every tool this server exposes, in the order clients see them.
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        // ---- Sessions ----
        tool(
            "create_session",
            "Start a new ChucK engine session on a free port. Uses the given working directory or creates a private one.",
            json!({
                "type": "object",
                "properties": {
                    "working_directory": {
                        "type": "string",
                        "description": "Directory the engine runs in. Created if missing. Omit for an auto-created directory removed when the session ends."
                    }
                }
            }),
        ),
        tool(
            "get_session",
            "Get the current status, port and directory of a session.",
            session_id_only(),
        ),
        tool("list_sessions", "List all active engine sessions.", no_args()),
        tool(
            "stop_session",
            "Stop a session's engine and release its port. Stopping an already stopped session succeeds.",
            session_id_only(),
        ),
        tool(
            "get_session_output",
            "Read the most recent console output of a session's engine.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": { "type": "string" },
                    "lines": { "type": "integer", "minimum": 1, "description": "Number of lines (default 50)" }
                },
                "required": ["session_id"]
            }),
        ),
        // ---- Volumes ----
        tool(
            "scan_volume",
            "Index (or re-index) every file under a directory. Registers the volume on first scan.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string", "description": "Absolute directory path" },
                    "name": { "type": "string", "description": "Display name (defaults to the directory name)" },
                    "description": { "type": "string" }
                },
                "required": ["root_path"]
            }),
        ),
        tool(
            "list_assets",
            "List indexed files of a scanned volume. Served from the index without touching the disk.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string" },
                    "contains": { "type": "string", "description": "Case-insensitive substring of the relative path" },
                    "extension": { "type": "string", "description": "File extension, e.g. wav" },
                    "pattern": { "type": "string", "description": "Regular expression on the relative path" },
                    "limit": { "type": "integer", "minimum": 0 },
                    "offset": { "type": "integer", "minimum": 0 }
                },
                "required": ["root_path"]
            }),
        ),
        tool(
            "get_asset",
            "Get cached metadata for one file of a scanned volume.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string" },
                    "relative_path": { "type": "string", "description": "Path inside the volume, '/'-separated" }
                },
                "required": ["root_path", "relative_path"]
            }),
        ),
        tool(
            "list_volumes",
            "List registered volumes with asset counts and last scan time.",
            no_args(),
        ),
        tool(
            "get_volume",
            "Get one registered volume with its asset count, total size and last scan time.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string" }
                },
                "required": ["root_path"]
            }),
        ),
        tool(
            "update_volume",
            "Change a volume's name or description without rescanning it.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string" },
                    "name": { "type": "string", "description": "New display name" },
                    "description": { "type": "string" }
                },
                "required": ["root_path"]
            }),
        ),
        tool(
            "remove_volume",
            "Forget a volume and its cached assets. Files on disk are not touched.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string" }
                },
                "required": ["root_path"]
            }),
        ),
        tool(
            "list_asset_keywords",
            "List keywords found in indexed file and folder names, most common first. Use them to find sample families before calling list_assets.",
            json!({
                "type": "object",
                "properties": {
                    "root_path": { "type": "string", "description": "Limit to one volume (default: all volumes)" },
                    "limit": { "type": "integer", "minimum": 0 }
                }
            }),
        ),
    ]
}
