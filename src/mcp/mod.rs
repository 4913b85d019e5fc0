//! MCP (Model Context Protocol) server implementation.
//!
//! Provides a JSON-RPC over stdio server that exposes engine session and
//! volume index tools to MCP clients.
//!
//! Architecture:
//! - `server.rs` -- JSON-RPC protocol handler (stdin/stdout)
//! - `tools.rs`  -- Tool definitions and input schemas
//! - `handlers/` -- Tool handler implementations (session, volume)

pub mod handlers;
pub mod server;
pub mod tools;

pub use server::{run_server, McpServerState};
