//! Engine process collaborator.
//!
//! The lifecycle manager only talks to `ProcessLauncher` / `EngineProcess`,
//! so tests can script process behaviour without spawning anything.
//! `EngineLauncher` is the real implementation on top of `tokio::process`.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Everything needed to start one engine instance.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub session_id: String,
    pub executable: PathBuf,
    /// Arguments with placeholders already substituted.
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub port: u16,
    /// How many console lines to retain.
    pub console_lines: usize,
}

/// Which readiness check to run after spawning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessKind {
    /// Ready once the process has stayed up for the settle period.
    #[default]
    Alive,
    /// Ready once 127.0.0.1:port accepts a TCP connection.
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    Alive { settle: Duration },
    TcpPort { port: u16, interval: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Exited(Option<i32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitWait {
    Exited(Option<i32>),
    TimedOut,
}

/// A running engine instance, exclusively owned by the lifecycle manager.
pub trait EngineProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on unix).
    fn signal_terminate(&mut self) -> io::Result<()>;

    fn force_kill(&mut self) -> io::Result<()>;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    fn wait_exit(&mut self, timeout: Duration) -> BoxFuture<'_, ExitWait>;

    /// Resolves once the probe passes or the process exits. Callers bound it
    /// with their own timeout.
    fn wait_ready<'a>(&'a mut self, probe: &'a ReadinessProbe) -> BoxFuture<'a, Readiness>;

    /// Up to `limit` of the most recent console lines, oldest first.
    fn console_tail(&self, limit: usize) -> Vec<String>;
}

pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<Box<dyn EngineProcess>>;
}

/// Bounded ring of console lines shared between reader tasks and the handle.
#[derive(Clone)]
pub struct ConsoleBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn tail(&self, limit: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }
}

fn spawn_console_reader<R>(reader: R, console: ConsoleBuffer, session_id: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(session = %session_id, stream, "{}", line);
                    console.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(session = %session_id, stream, "Console read ended: {}", e);
                    break;
                }
            }
        }
    });
}

/// Launches the audio engine as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineLauncher;

impl ProcessLauncher for EngineLauncher {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<Box<dyn EngineProcess>> {
        let mut cmd = Command::new(&request.executable);
        cmd.args(&request.args)
            .current_dir(&request.working_directory)
            .env("CHUCK_MCP_SESSION", &request.session_id)
            .env("CHUCK_MCP_PORT", request.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let console = ConsoleBuffer::new(request.console_lines);
        if let Some(stdout) = child.stdout.take() {
            spawn_console_reader(stdout, console.clone(), request.session_id.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_console_reader(stderr, console.clone(), request.session_id.clone(), "stderr");
        }

        debug!(
            session = %request.session_id,
            pid = ?child.id(),
            "Spawned {}",
            request.executable.display()
        );
        Ok(Box::new(EngineChild { child, console }))
    }
}

struct EngineChild {
    child: Child,
    console: ConsoleBuffer,
}

impl EngineProcess for EngineChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        // `id()` is None once the child has been reaped.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        // SAFETY: plain syscall on a pid we own and have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn force_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("Failed to poll engine process: {}", e);
                false
            }
        }
    }

    fn wait_exit(&mut self, timeout: Duration) -> BoxFuture<'_, ExitWait> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(status)) => ExitWait::Exited(status.code()),
                Ok(Err(e)) => {
                    warn!("Failed to wait for engine process: {}", e);
                    ExitWait::Exited(None)
                }
                Err(_) => ExitWait::TimedOut,
            }
        })
    }

    fn wait_ready<'a>(&'a mut self, probe: &'a ReadinessProbe) -> BoxFuture<'a, Readiness> {
        Box::pin(async move {
            match probe {
                ReadinessProbe::Alive { settle } => {
                    tokio::select! {
                        status = self.child.wait() => {
                            Readiness::Exited(status.ok().and_then(|s| s.code()))
                        }
                        _ = tokio::time::sleep(*settle) => Readiness::Ready,
                    }
                }
                ReadinessProbe::TcpPort { port, interval } => loop {
                    if let Ok(Some(status)) = self.child.try_wait() {
                        return Readiness::Exited(status.code());
                    }
                    if tokio::net::TcpStream::connect(("127.0.0.1", *port)).await.is_ok() {
                        return Readiness::Ready;
                    }
                    tokio::time::sleep(*interval).await;
                },
            }
        })
    }

    fn console_tail(&self, limit: usize) -> Vec<String> {
        self.console.tail(limit)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_buffer_keeps_newest_lines() {
        let console = ConsoleBuffer::new(3);
        for i in 0..5 {
            console.push(format!("line {i}"));
        }
        assert_eq!(console.tail(10), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(console.tail(1), vec!["line 4"]);
    }

    #[test]
    fn test_readiness_kind_parses_lowercase() {
        let kind: ReadinessKind = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(kind, ReadinessKind::Tcp);
        assert_eq!(ReadinessKind::default(), ReadinessKind::Alive);
    }

    #[cfg(unix)]
    fn request(executable: &str, args: &[&str], dir: &std::path::Path) -> SpawnRequest {
        SpawnRequest {
            session_id: "test".into(),
            executable: PathBuf::from(executable),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_directory: dir.to_path_buf(),
            port: 0,
            console_lines: 10,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_launcher_terminates_with_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = EngineLauncher.spawn(&request("sleep", &["30"], dir.path())).unwrap();
        assert!(process.pid().is_some());
        let probe = ReadinessProbe::Alive {
            settle: Duration::from_millis(50),
        };
        assert_eq!(process.wait_ready(&probe).await, Readiness::Ready);
        assert!(process.is_alive());

        process.signal_terminate().unwrap();
        assert!(matches!(
            process.wait_exit(Duration::from_secs(5)).await,
            ExitWait::Exited(_)
        ));
        assert!(!process.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_launcher_reports_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = EngineLauncher.spawn(&request("false", &[], dir.path())).unwrap();
        let probe = ReadinessProbe::Alive {
            settle: Duration::from_secs(5),
        };
        assert_eq!(process.wait_ready(&probe).await, Readiness::Exited(Some(1)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_launcher_captures_console() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = EngineLauncher
            .spawn(&request("sh", &["-c", "echo hello; echo world >&2"], dir.path()))
            .unwrap();
        process.wait_exit(Duration::from_secs(5)).await;
        // Reader tasks may lag behind process exit.
        for _ in 0..50 {
            if process.console_tail(10).len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut lines = process.console_tail(10);
        lines.sort();
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_errors() {
        let dir = tempfile::tempdir().unwrap();
        let req = SpawnRequest {
            session_id: "x".into(),
            executable: PathBuf::from("/definitely/not/an/engine"),
            args: Vec::new(),
            working_directory: dir.path().to_path_buf(),
            port: 0,
            console_lines: 0,
        };
        assert!(EngineLauncher.spawn(&req).is_err());
    }
}
