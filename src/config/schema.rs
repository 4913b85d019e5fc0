use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::session::ReadinessKind;

/// Root configuration (`config.json` in the data directory).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub volumes: VolumesConfig,
}

/// How engine processes are launched and supervised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Executable name (looked up on PATH) or path.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// `{port}`, `{dir}` and `{session}` are substituted per session.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub readiness: ReadinessKind,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,
    #[serde(default = "default_console_lines")]
    pub console_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: default_args(),
            readiness: ReadinessKind::Alive,
            settle_ms: default_settle_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            liveness_poll_ms: default_liveness_poll_ms(),
            console_lines: default_console_lines(),
        }
    }
}

/// Port pool handed out to sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortsConfig {
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_count")]
    pub count: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            count: default_port_count(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Parent of auto-created session directories. Defaults to
    /// `{data_dir}/sessions`.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesConfig {
    /// Defaults to `{data_dir}/chuck_library.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Extension allow-list for scans. Empty indexes every regular file.
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_executable() -> String { "chuck".into() }
fn default_args() -> Vec<String> { vec!["--loop".into(), "--port{port}".into()] }
fn default_settle_ms() -> u64 { 500 }
fn default_readiness_timeout_ms() -> u64 { 5000 }
fn default_stop_grace_ms() -> u64 { 3000 }
fn default_liveness_poll_ms() -> u64 { 1000 }
fn default_console_lines() -> usize { 200 }
fn default_base_port() -> u16 { 8888 }
fn default_port_count() -> u16 { 16 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.engine.executable, "chuck");
        assert_eq!(config.engine.args, vec!["--loop", "--port{port}"]);
        assert_eq!(config.engine.readiness, ReadinessKind::Alive);
        assert_eq!(config.engine.readiness_timeout_ms, 5000);
        assert_eq!(config.ports.base_port, 8888);
        assert_eq!(config.ports.count, 16);
        assert!(config.sessions.root_dir.is_none());
        assert!(config.volumes.extensions.is_empty());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "engine": { "executable": "/opt/chuck/bin/chuck", "readiness": "tcp", "stopGraceMs": 100 },
                "ports": { "count": 4 },
                "volumes": { "databasePath": "/tmp/lib.db", "extensions": ["wav", "aiff"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.engine.executable, "/opt/chuck/bin/chuck");
        assert_eq!(config.engine.readiness, ReadinessKind::Tcp);
        assert_eq!(config.engine.stop_grace_ms, 100);
        assert_eq!(config.engine.settle_ms, 500);
        assert_eq!(config.ports.base_port, 8888);
        assert_eq!(config.ports.count, 4);
        assert_eq!(config.volumes.database_path, Some(PathBuf::from("/tmp/lib.db")));
        assert_eq!(config.volumes.extensions, vec!["wav", "aiff"]);
    }

    #[test]
    fn test_round_trips_camel_case() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        assert!(json["engine"].get("readinessTimeoutMs").is_some());
        assert!(json["ports"].get("basePort").is_some());
    }
}
