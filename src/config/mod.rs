//! Configuration loading and data directory paths.

pub mod paths;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

pub use schema::AppConfig;

use crate::session::{PortPool, SessionConfig};

pub const CONFIG_PATH_ENV: &str = "CHUCK_MCP_CONFIG";
pub const ENGINE_ENV: &str = "CHUCK_MCP_ENGINE";
pub const BASE_PORT_ENV: &str = "CHUCK_MCP_BASE_PORT";
pub const PORT_COUNT_ENV: &str = "CHUCK_MCP_PORT_COUNT";

/// Path to config.json (`CHUCK_MCP_CONFIG` wins).
pub fn get_config_path(data_dir: &Path) -> PathBuf {
    match std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => data_dir.join("config.json"),
    }
}

/// Load config.json and apply environment overrides. A missing or broken
/// file falls back to defaults.
pub fn load_config(data_dir: &Path) -> AppConfig {
    let path = get_config_path(data_dir);
    let mut config: AppConfig = read_json_file(&path).unwrap_or_default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Apply `CHUCK_MCP_*` overrides. `lookup` returns the value of a variable.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(engine) = lookup(ENGINE_ENV).filter(|v| !v.is_empty()) {
        config.engine.executable = engine;
    }
    if let Some(port) = parse_var::<u16>(&lookup, BASE_PORT_ENV) {
        config.ports.base_port = port;
    }
    if let Some(count) = parse_var::<u16>(&lookup, PORT_COUNT_ENV) {
        config.ports.count = count;
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

/// Resolve the engine executable. Bare names are looked up on PATH; when
/// that fails the name is kept as-is and spawning reports the error.
pub fn resolve_executable(executable: &str) -> PathBuf {
    let candidate = Path::new(executable);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match which::which(executable) {
        Ok(path) => {
            debug!("Resolved engine {} -> {}", executable, path.display());
            path
        }
        Err(e) => {
            warn!("Engine '{}' not found on PATH ({}); sessions will fail to start", executable, e);
            candidate.to_path_buf()
        }
    }
}

impl AppConfig {
    pub fn sessions_root(&self, data_dir: &Path) -> PathBuf {
        self.sessions
            .root_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("sessions"))
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.volumes
            .database_path
            .clone()
            .unwrap_or_else(|| data_dir.join("chuck_library.db"))
    }

    /// Build the lifecycle manager settings.
    pub fn session_config(&self, data_dir: &Path) -> SessionConfig {
        let engine = &self.engine;
        SessionConfig {
            executable: resolve_executable(&engine.executable),
            args: engine.args.clone(),
            ports: PortPool::new(self.ports.base_port, self.ports.count),
            sessions_root: self.sessions_root(data_dir),
            readiness: engine.readiness,
            settle: Duration::from_millis(engine.settle_ms),
            readiness_timeout: Duration::from_millis(engine.readiness_timeout_ms),
            stop_grace: Duration::from_millis(engine.stop_grace_ms),
            liveness_poll: Duration::from_millis(engine.liveness_poll_ms.max(1)),
            console_lines: engine.console_lines,
        }
    }
}

/// Read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[(ENGINE_ENV, "/usr/local/bin/chuck"), (BASE_PORT_ENV, "9000"), (PORT_COUNT_ENV, "2")]),
        );
        assert_eq!(config.engine.executable, "/usr/local/bin/chuck");
        assert_eq!(config.ports.base_port, 9000);
        assert_eq!(config.ports.count, 2);
    }

    #[test]
    fn test_invalid_env_numbers_are_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[(BASE_PORT_ENV, "eighty"), (PORT_COUNT_ENV, "70000")]));
        assert_eq!(config.ports.base_port, 8888);
        assert_eq!(config.ports.count, 16);
    }

    #[test]
    fn test_read_json_file_missing_and_broken() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<AppConfig> = read_json_file(&dir.path().join("config.json"));
        assert!(missing.is_none());

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(read_json_file::<AppConfig>(&broken).is_none());

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"ports":{"basePort":7000}}"#).unwrap();
        let config: AppConfig = read_json_file(&good).unwrap();
        assert_eq!(config.ports.base_port, 7000);
    }

    #[test]
    fn test_default_paths_live_under_data_dir() {
        let config = AppConfig::default();
        let data = Path::new("/data/chuck-mcp");
        assert_eq!(config.sessions_root(data), data.join("sessions"));
        assert_eq!(config.database_path(data), data.join("chuck_library.db"));
    }

    #[test]
    fn test_session_config_converts_durations() {
        let mut config = AppConfig::default();
        config.engine.executable = "/opt/chuck".into();
        let session = config.session_config(Path::new("/data"));
        assert_eq!(session.executable, PathBuf::from("/opt/chuck"));
        assert_eq!(session.stop_grace, Duration::from_secs(3));
        assert_eq!(session.ports, PortPool::new(8888, 16));
    }
}
