//! MCP tool handler implementations.
//!
//! - `session` -- engine session tools (create/get/list/stop/output)
//! - `volume`  -- volume index tools (scan/list/get/remove)

pub mod session;
pub mod volume;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorKind, ToolFailure};

/// Result type returned by all MCP tool handlers.
///
/// Matches the MCP protocol's tool result format:
/// ```json
/// {
///   "content": [{ "type": "text", "text": "..." }],
///   "isError": false
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// A single content item in an MCP tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum McpContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl McpToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Successful result holding `value` as pretty JSON.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(pretty(&json!({
                "error": ErrorKind::StorageError.as_str(),
                "message": format!("failed to encode result: {}", e),
            }))),
        }
    }

    /// Error result carrying the failure's kind, message and context.
    pub fn failure(err: &dyn ToolFailure) -> Self {
        Self::error(pretty(&err.to_payload()))
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::error(pretty(&json!({
            "error": ErrorKind::InvalidArguments.as_str(),
            "message": message.into(),
        })))
    }

    /// Text of the first content item.
    pub fn first_text(&self) -> &str {
        match self.content.first() {
            Some(McpContent::Text { text }) => text,
            None => "",
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// ---------------------------------------------------------------------------
// Argument extraction
// ---------------------------------------------------------------------------

/// A non-empty string argument, or an `InvalidArguments` result.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, McpToolResult> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(McpToolResult::invalid_arguments(format!("{} is required", key)))
        }
        Some(_) => Err(McpToolResult::invalid_arguments(format!("{} must be a string", key))),
    }
}

/// An optional string argument. Empty strings count as absent.
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, McpToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(McpToolResult::invalid_arguments(format!("{} must be a string", key))),
    }
}

/// An optional non-negative integer argument.
pub fn optional_usize(args: &Value, key: &str) -> Result<Option<usize>, McpToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                McpToolResult::invalid_arguments(format!("{} must be a non-negative integer", key))
            }),
    }
}
