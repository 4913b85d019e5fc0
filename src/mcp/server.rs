//! MCP JSON-RPC protocol handler over stdio.
//!
//! Reads JSON-RPC requests from stdin, routes tool calls to the appropriate
//! handler, and sends JSON-RPC responses to stdout. Implements the MCP protocol
//! methods: `initialize`, `initialized`, `ping`, `tools/list`, `tools/call`.
//!
//! Each request runs on its own task so a slow engine startup or volume scan
//! never blocks unrelated calls. Responses are funnelled through one writer
//! task, so lines are never interleaved; they may arrive out of request order
//! and clients match them by id.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::handlers;
use super::handlers::McpToolResult;
use super::tools::{all_tools, ToolDefinition};
use crate::session::SessionManager;
use crate::volumes::VolumeIndex;

// ---------------------------------------------------------------------------
// JSON-RPC message types
// ---------------------------------------------------------------------------

/// Incoming JSON-RPC request.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Outgoing JSON-RPC response.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

/// Shared server state: the two subsystems every tool talks to.
pub struct McpServerState {
    sessions: Arc<SessionManager>,
    volumes: VolumeIndex,
    tools: Vec<ToolDefinition>,
}

impl McpServerState {
    pub fn new(sessions: Arc<SessionManager>, volumes: VolumeIndex) -> Self {
        Self {
            sessions,
            volumes,
            tools: all_tools(),
        }
    }
}

/// Run the MCP server on stdin/stdout until stdin closes.
///
/// Diagnostic logs go to stderr and the log file, never stdout.
pub async fn run_server(state: Arc<McpServerState>) -> std::io::Result<()> {
    info!("chuck-mcp server running on stdio");
    serve(state, tokio::io::stdin(), tokio::io::stdout()).await?;
    info!("MCP server stdin closed, shutting down");
    Ok(())
}

/// Serve JSON-RPC lines from `reader`, writing responses to `writer`.
/// Returns once the input is exhausted and every in-flight request has
/// been answered.
pub async fn serve<R, W>(state: Arc<McpServerState>, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                let _ = tx.send(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Invalid JSON: {}", e),
                ));
                continue;
            }
        };

        if request.jsonrpc != "2.0" {
            if let Some(id) = request.id {
                let _ = tx.send(JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid JSON-RPC version"));
            }
            continue;
        }

        let state = Arc::clone(&state);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_request(&state, request).await {
                let _ = tx.send(response);
            }
        });
    }

    // The writer drains until every request task has dropped its sender.
    drop(tx);
    if let Err(e) = writer_task.await {
        error!("[MCP] Writer task failed: {}", e);
    }
    Ok(())
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        write_response(&mut writer, &response).await;
    }
}

/// Handle a single JSON-RPC request. Notifications (no id) never get a
/// response.
async fn handle_request(state: &McpServerState, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let is_notification = request.id.is_none();
    let id = request.id.unwrap_or(Value::Null);

    let response = match request.method.as_str() {
        "initialize" => handle_initialize(id),
        "initialized" | "notifications/initialized" => {
            info!("[MCP] Client initialized");
            return None;
        }
        "notifications/cancelled" => {
            info!("[MCP] Request cancelled: {:?}", request.params);
            return None;
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => handle_tools_list(id, state),
        "tools/call" => handle_tools_call(state, id, &request.params).await,
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {}", other)),
    };

    if is_notification {
        None
    } else {
        Some(response)
    }
}

/// Handle `initialize` -- return server capabilities.
fn handle_initialize(id: Value) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": "chuck-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

/// Handle `tools/list`.
fn handle_tools_list(id: Value, state: &McpServerState) -> JsonRpcResponse {
    match serde_json::to_value(&state.tools) {
        Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}

/// Handle `tools/call` -- dispatch to the appropriate tool handler.
async fn handle_tools_call(state: &McpServerState, id: Value, params: &Value) -> JsonRpcResponse {
    let tool_name = params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    if tool_name.is_empty() {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name in params");
    }

    let started = Instant::now();
    let result = route_tool_call(&tool_name, &args, state).await;
    debug!(
        tool = %tool_name,
        is_error = result.is_error,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "[MCP] Tool call finished"
    );

    match serde_json::to_value(&result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}

/// Route a tool call to the appropriate handler module.
async fn route_tool_call(name: &str, args: &Value, state: &McpServerState) -> McpToolResult {
    let sessions = state.sessions.as_ref();
    let volumes = &state.volumes;
    match name {
        // ---- Session tools ----
        "create_session" => handlers::session::handle_create_session(args, sessions).await,
        "get_session" => handlers::session::handle_get_session(args, sessions).await,
        "list_sessions" => handlers::session::handle_list_sessions(args, sessions).await,
        "stop_session" => handlers::session::handle_stop_session(args, sessions).await,
        "get_session_output" => handlers::session::handle_get_session_output(args, sessions).await,

        // ---- Volume tools ----
        "scan_volume" => handlers::volume::handle_scan_volume(args, volumes).await,
        "list_assets" => handlers::volume::handle_list_assets(args, volumes).await,
        "get_asset" => handlers::volume::handle_get_asset(args, volumes).await,
        "list_volumes" => handlers::volume::handle_list_volumes(args, volumes).await,
        "get_volume" => handlers::volume::handle_get_volume(args, volumes).await,
        "update_volume" => handlers::volume::handle_update_volume(args, volumes).await,
        "remove_volume" => handlers::volume::handle_remove_volume(args, volumes).await,
        "list_asset_keywords" => handlers::volume::handle_list_asset_keywords(args, volumes).await,

        _ => McpToolResult::invalid_arguments(format!("Unknown tool: {}", name)),
    }
}

/// Write a JSON-RPC response (one line).
async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            let line = format!("{}\n", json);
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                error!("[MCP] Failed to write response: {}", e);
            }
            if let Err(e) = writer.flush().await {
                error!("[MCP] Failed to flush stdout: {}", e);
            }
        }
        Err(e) => {
            error!("[MCP] Failed to serialize response: {}", e);
        }
    }
}
