//! chuck-mcp: an MCP server that runs ChucK engine sessions and indexes
//! sample libraries.
//!
//! - `session` -- engine session registry and lifecycle manager
//! - `volumes` -- directory trees of audio assets cached in SQLite
//! - `db`      -- SQLite access layer and schema migrations
//! - `mcp`     -- JSON-RPC server and tool handlers
//! - `config`  -- config.json, env overrides and data paths
//! - `services` -- logging

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod services;
pub mod session;
pub mod volumes;
