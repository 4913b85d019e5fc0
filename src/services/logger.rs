use std::fs;
use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the structured logging system.
///
/// Sets up:
/// - File output: rolling log files `{log_dir}/chuck-mcp.<date>.log` with
///   daily rotation, keeping the latest 5 files.
/// - Console output (stderr). Stdout carries JSON-RPC and must stay clean.
/// - Environment filter: defaults to `info`, configurable via `RUST_LOG`.
///
/// Fails if the log directory cannot be used or a global subscriber is
/// already installed.
pub fn init(log_dir: &Path) -> Result<(), String> {
    fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("chuck-mcp")
        .filename_suffix("log")
        .max_log_files(5)
        .build(log_dir)
        .map_err(|e| format!("Failed to create log file appender: {}", e))?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| format!("Logger already initialized: {}", e))?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}

/// Stderr-only logging, used when the log directory is unusable.
pub fn init_stderr() -> Result<(), String> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false).compact())
        .try_init()
        .map_err(|e| format!("Logger already initialized: {}", e))
}

// RUST_LOG wins; otherwise info, with the SQLite/tokio internals kept quiet.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mio=warn,tokio=warn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_unusable_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(init(&file.join("logs")).is_err());
    }
}
