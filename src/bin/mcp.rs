//! chuck-mcp server binary.
//!
//! Spawned by an MCP client and spoken to over **stdio** (JSON-RPC 2.0).
//! Logs go to stderr and `{data_dir}/logs`.
//!
//! Environment variables:
//! - `CHUCK_MCP_DATA_DIR` - data directory (config.json, library DB, sessions)
//! - `CHUCK_MCP_CONFIG` - alternate config.json path
//! - `CHUCK_MCP_ENGINE` - engine executable
//! - `CHUCK_MCP_BASE_PORT` / `CHUCK_MCP_PORT_COUNT` - session port pool
//! - `RUST_LOG` - log filter (default `info`)

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use chuck_mcp_lib::config::{self, paths};
use chuck_mcp_lib::db::Database;
use chuck_mcp_lib::mcp::{run_server, McpServerState};
use chuck_mcp_lib::services::logger;
use chuck_mcp_lib::session::{EngineLauncher, SessionManager, SessionRegistry};
use chuck_mcp_lib::volumes::{LocalFs, VolumeIndex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = paths::get_data_dir();

    if let Err(e) = logger::init(&paths::get_log_dir(&data_dir)) {
        let _ = logger::init_stderr();
        warn!("File logging disabled: {}", e);
    }

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let app_config = config::load_config(&data_dir);

    let db_path = app_config.database_path(&data_dir);
    let db = Database::open(&db_path)
        .with_context(|| format!("opening library database {}", db_path.display()))?;
    let volumes = VolumeIndex::new(db, Arc::new(LocalFs), &app_config.volumes.extensions);

    let session_config = app_config.session_config(&data_dir);
    info!(
        engine = %session_config.executable.display(),
        base_port = session_config.ports.base,
        ports = session_config.ports.count,
        "Session manager ready"
    );
    let sessions = Arc::new(SessionManager::new(
        session_config,
        Arc::new(SessionRegistry::new()),
        Arc::new(EngineLauncher),
    ));
    let reconciler = sessions.spawn_reconciler();

    let state = Arc::new(McpServerState::new(Arc::clone(&sessions), volumes));
    let served = tokio::select! {
        result = run_server(state) => result.context("MCP server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    // Engines must not outlive the server.
    sessions.shutdown().await;
    if let Err(e) = reconciler.await {
        warn!("Reconciler task ended abnormally: {}", e);
    }
    served
}
