//! Platform-specific data directory paths.
//!
//!   Windows: %APPDATA%/chuck-mcp
//!   macOS:   ~/Library/Application Support/chuck-mcp
//!   Linux:   $XDG_DATA_HOME/chuck-mcp (default ~/.local/share)
//!
//! `CHUCK_MCP_DATA_DIR` overrides all of the above.

use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "CHUCK_MCP_DATA_DIR";

const APP_DIR: &str = "chuck-mcp";

/// Get the chuck-mcp data directory (cross-platform).
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    get_data_base().join(APP_DIR)
}

/// Directory holding rolling log files.
pub fn get_log_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

fn get_data_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // Respects XDG_DATA_HOME, defaults to ~/.local/share
        dirs::data_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
    }
}
