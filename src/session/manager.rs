//! Session lifecycle: create, observe, stop and reap engine instances.
//!
//! The manager exclusively owns each engine process handle and, for
//! auto-created sessions, the working directory. The registry holds the
//! shareable snapshot. Every exit path (stop, crash detection, failed
//! startup, shutdown) goes through the same release steps so a port and a
//! directory are released exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::process::{
    EngineProcess, ExitWait, ProcessLauncher, Readiness, ReadinessKind, ReadinessProbe,
    SpawnRequest,
};
use super::registry::SessionRegistry;
use super::types::{PortPool, Session, SessionError, SessionStatus};

/// Interval between TCP readiness attempts.
const TCP_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval while shutdown waits for in-flight creates.
const STARTUP_DRAIN_POLL: Duration = Duration::from_millis(10);
const STARTUP_DRAIN_SLACK: Duration = Duration::from_millis(500);

fn shutting_down() -> SessionError {
    SessionError::Conflict {
        resource: "session manager".into(),
        detail: "shutting down; no new sessions accepted".into(),
    }
}

/// Runtime settings for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub executable: PathBuf,
    /// Engine arguments. `{port}`, `{dir}` and `{session}` are substituted.
    pub args: Vec<String>,
    pub ports: PortPool,
    /// Parent directory for auto-created session directories.
    pub sessions_root: PathBuf,
    pub readiness: ReadinessKind,
    pub settle: Duration,
    pub readiness_timeout: Duration,
    pub stop_grace: Duration,
    pub liveness_poll: Duration,
    pub console_lines: usize,
}

impl SessionConfig {
    fn probe(&self, port: u16) -> ReadinessProbe {
        match self.readiness {
            ReadinessKind::Alive => ReadinessProbe::Alive {
                settle: self.settle,
            },
            ReadinessKind::Tcp => ReadinessProbe::TcpPort {
                port,
                interval: TCP_PROBE_INTERVAL,
            },
        }
    }

    fn render_args(&self, port: u16, dir: &Path, session_id: &str) -> Vec<String> {
        let port = port.to_string();
        let dir = dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{port}", &port)
                    .replace("{dir}", &dir)
                    .replace("{session}", session_id)
            })
            .collect()
    }
}

/// Working directory of a session.
enum WorkDir {
    /// Created for the session; removed on release.
    Owned(TempDir),
    /// Supplied by the caller; kept once a session has used it. `created`
    /// records whether this create made the directory.
    Borrowed { path: PathBuf, created: bool },
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Owned(dir) => dir.path(),
            WorkDir::Borrowed { path, .. } => path,
        }
    }

    fn is_owned(&self) -> bool {
        matches!(self, WorkDir::Owned(_))
    }

    fn release(self) {
        if let WorkDir::Owned(dir) = self {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove session directory {}: {}", path.display(), e);
            }
        }
    }

    /// Release for a create that never ran a session: a requested directory
    /// this create made is removed again, provided it is still empty.
    fn discard(self) {
        match self {
            WorkDir::Borrowed {
                path,
                created: true,
            } => {
                if let Err(e) = std::fs::remove_dir(&path) {
                    debug!("Keeping requested directory {}: {}", path.display(), e);
                }
            }
            other => other.release(),
        }
    }
}

/// Resources the manager holds for a Running session.
struct OwnedSession {
    process: Box<dyn EngineProcess>,
    workdir: WorkDir,
}

pub struct SessionManager {
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    launcher: Arc<dyn ProcessLauncher>,
    owned: Mutex<HashMap<String, OwnedSession>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        registry: Arc<SessionRegistry>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            launcher,
            owned: Mutex::new(HashMap::new()),
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start a new engine session and wait until it is ready.
    pub async fn create_session(
        &self,
        requested_directory: Option<PathBuf>,
    ) -> Result<Session, SessionError> {
        // Subscribe before checking so a shutdown that lands mid-startup is
        // always observed by the readiness wait below.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Err(shutting_down());
        }

        let id = Uuid::new_v4().to_string();
        let workdir = self.prepare_directory(&id, requested_directory)?;

        let now = Utc::now();
        let claimed = self.registry.claim(&self.config.ports, |port| Session {
            id: id.clone(),
            port,
            working_directory: workdir.path().to_path_buf(),
            owns_directory: workdir.is_owned(),
            status: SessionStatus::Starting,
            created_at: now,
            updated_at: now,
            pid: None,
        });
        let session = match claimed {
            Ok(session) => session,
            Err(e) => {
                workdir.discard();
                return Err(e);
            }
        };
        info!(
            session = %id,
            port = session.port,
            "Starting engine in {}",
            session.working_directory.display()
        );

        let request = SpawnRequest {
            session_id: id.clone(),
            executable: self.config.executable.clone(),
            args: self
                .config
                .render_args(session.port, &session.working_directory, &id),
            working_directory: session.working_directory.clone(),
            port: session.port,
            console_lines: self.config.console_lines,
        };
        let mut process = match self.launcher.spawn(&request) {
            Ok(process) => process,
            Err(e) => {
                self.abandon_startup(&id, workdir);
                return Err(SessionError::ProcessSpawn {
                    session_id: id,
                    reason: format!("failed to launch {}: {}", request.executable.display(), e),
                });
            }
        };
        if let Some(pid) = process.pid() {
            self.registry.set_pid(&id, pid);
        }

        let probe = self.config.probe(session.port);
        let failure = tokio::select! {
            readiness = tokio::time::timeout(self.config.readiness_timeout, process.wait_ready(&probe)) => {
                match readiness {
                    Ok(Readiness::Ready) => None,
                    Ok(Readiness::Exited(code)) => Some(match code {
                        Some(code) => format!("engine exited with code {} before becoming ready", code),
                        None => "engine exited before becoming ready".to_string(),
                    }),
                    Err(_) => Some(format!(
                        "engine not ready after {} ms",
                        self.config.readiness_timeout.as_millis()
                    )),
                }
            }
            _ = shutdown_rx.changed() => Some("server shutting down before the engine became ready".to_string()),
        };
        if let Some(reason) = failure {
            let console = process.console_tail(5);
            self.terminate(&id, process.as_mut()).await;
            self.abandon_startup(&id, workdir);
            warn!(session = %id, "Startup failed: {} {:?}", reason, console);
            return Err(SessionError::ProcessSpawn {
                session_id: id,
                reason,
            });
        }

        // Insert before publishing Running so a stop that observes Running
        // always finds the process. The shutdown flag is read under the same
        // lock `shutdown` drains, so the session is either drained there or
        // torn down here.
        let rejected = {
            let mut owned = self.owned.lock().await;
            let session = OwnedSession { process, workdir };
            if *self.shutdown_tx.borrow() {
                Some(session)
            } else {
                owned.insert(id.clone(), session);
                None
            }
        };
        if let Some(session) = rejected {
            self.teardown(&id, session, SessionStatus::Failed).await;
            return Err(SessionError::ProcessSpawn {
                session_id: id,
                reason: "server shutting down".into(),
            });
        }

        match self.registry.transition(&id, SessionStatus::Running) {
            Ok(session) => {
                info!(session = %id, port = session.port, "Session running");
                Ok(session)
            }
            Err(e) => {
                let owned = self.owned.lock().await.remove(&id);
                if let Some(owned) = owned {
                    self.teardown(&id, owned, SessionStatus::Failed).await;
                }
                Err(e)
            }
        }
    }

    /// Stop a session. Stopping an already torn-down session succeeds.
    pub async fn stop_session(&self, id: &str) -> Result<(), SessionError> {
        let session = match self.registry.lookup(id) {
            Ok(session) => session,
            Err(e) => {
                if self.registry.was_retired(id) {
                    debug!(session = %id, "Stop on finished session");
                    return Ok(());
                }
                return Err(e);
            }
        };

        match session.status {
            SessionStatus::Starting => {
                return Err(SessionError::Conflict {
                    resource: format!("session {}", id),
                    detail: "still starting; retry once it is running".into(),
                })
            }
            SessionStatus::Running => {}
            // Another caller is already tearing it down.
            SessionStatus::Stopping | SessionStatus::Stopped | SessionStatus::Failed => {
                return Ok(())
            }
        }

        let Some(owned) = self.owned.lock().await.remove(id) else {
            return Ok(());
        };
        self.teardown(id, owned, SessionStatus::Stopped).await;
        Ok(())
    }

    pub fn get_status(&self, id: &str) -> Result<Session, SessionError> {
        self.registry.lookup(id)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.registry.list_active()
    }

    /// Most recent engine console lines of an active session.
    pub async fn session_output(&self, id: &str, limit: usize) -> Result<Vec<String>, SessionError> {
        self.registry.lookup(id)?;
        Ok(self
            .owned
            .lock()
            .await
            .get(id)
            .map(|owned| owned.process.console_tail(limit))
            .unwrap_or_default())
    }

    /// Fail every Running session whose process has exited. Returns the ids
    /// that were reaped.
    pub async fn reconcile_once(&self) -> Vec<String> {
        let exited: Vec<(String, OwnedSession)> = {
            let mut owned = self.owned.lock().await;
            let ids: Vec<String> = owned
                .iter_mut()
                .filter_map(|(id, o)| (!o.process.is_alive()).then(|| id.clone()))
                .collect();
            ids.into_iter()
                .filter_map(|id| owned.remove_entry(&id))
                .collect()
        };

        let mut reaped = Vec::with_capacity(exited.len());
        for (id, owned) in exited {
            let tail = owned.process.console_tail(5);
            warn!(session = %id, "Engine exited unexpectedly: {:?}", tail);
            self.teardown(&id, owned, SessionStatus::Failed).await;
            reaped.push(id);
        }
        reaped
    }

    /// Poll process liveness every `liveness_poll` until shutdown.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.liveness_poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.reconcile_once().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Session reconciler stopped");
        })
    }

    /// Stop every active session and refuse new ones.
    ///
    /// Creates still waiting for readiness see the shutdown signal, terminate
    /// their engine and retire the session themselves; this waits for them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let sessions = self.registry.list_active();
        if !sessions.is_empty() {
            info!("Stopping {} session(s)", sessions.len());
        }
        for session in sessions {
            if session.status == SessionStatus::Starting {
                continue;
            }
            if let Err(e) = self.stop_session(&session.id).await {
                warn!(session = %session.id, "Stop during shutdown failed: {}", e);
            }
        }
        // Anything still owned was mid-transition; tear it down regardless.
        let leftovers: Vec<(String, OwnedSession)> = self.owned.lock().await.drain().collect();
        for (id, owned) in leftovers {
            self.teardown(&id, owned, SessionStatus::Failed).await;
        }

        // Terminate plus kill escalation each wait at most `stop_grace`.
        let drained = tokio::time::timeout(self.config.stop_grace * 3 + STARTUP_DRAIN_SLACK, async {
            while !self.registry.list_active().is_empty() {
                tokio::time::sleep(STARTUP_DRAIN_POLL).await;
            }
        })
        .await;
        if drained.is_err() {
            let left: Vec<String> = self.registry.list_active().into_iter().map(|s| s.id).collect();
            warn!("Sessions still active after shutdown: {:?}", left);
        }
    }

    fn prepare_directory(
        &self,
        id: &str,
        requested: Option<PathBuf>,
    ) -> Result<WorkDir, SessionError> {
        let directory_error = |path: &Path, reason: String| SessionError::Directory {
            path: path.to_path_buf(),
            reason,
        };

        let Some(requested) = requested else {
            let root = &self.config.sessions_root;
            std::fs::create_dir_all(root).map_err(|e| directory_error(root, e.to_string()))?;
            let root =
                std::fs::canonicalize(root).map_err(|e| directory_error(root, e.to_string()))?;
            let dir = tempfile::Builder::new()
                .prefix(&format!("session-{}-", id))
                .tempdir_in(&root)
                .map_err(|e| directory_error(&root, e.to_string()))?;
            return Ok(WorkDir::Owned(dir));
        };

        let absolute = if requested.is_absolute() {
            requested
        } else {
            std::env::current_dir()
                .map_err(|e| directory_error(&requested, e.to_string()))?
                .join(requested)
        };
        let created = !absolute.exists();
        if !created && !absolute.is_dir() {
            return Err(directory_error(&absolute, "not a directory".into()));
        }
        std::fs::create_dir_all(&absolute)
            .map_err(|e| directory_error(&absolute, e.to_string()))?;
        let canonical = std::fs::canonicalize(&absolute)
            .map_err(|e| directory_error(&absolute, e.to_string()))?;
        let workdir = WorkDir::Borrowed {
            path: canonical,
            created,
        };
        if let Err(e) = tempfile::tempfile_in(workdir.path()) {
            let err = directory_error(workdir.path(), format!("not writable: {}", e));
            workdir.discard();
            return Err(err);
        }
        Ok(workdir)
    }

    /// Graceful terminate, escalating to a kill after the stop grace period.
    async fn terminate(&self, id: &str, process: &mut dyn EngineProcess) {
        if let Err(e) = process.signal_terminate() {
            warn!(session = %id, "Failed to signal engine: {}", e);
        }
        match process.wait_exit(self.config.stop_grace).await {
            ExitWait::Exited(code) => debug!(session = %id, ?code, "Engine exited"),
            ExitWait::TimedOut => {
                warn!(
                    session = %id,
                    "Engine ignored terminate for {} ms, killing",
                    self.config.stop_grace.as_millis()
                );
                if let Err(e) = process.force_kill() {
                    error!(session = %id, "Failed to kill engine: {}", e);
                }
                if process.wait_exit(self.config.stop_grace).await == ExitWait::TimedOut {
                    error!(session = %id, "Engine still running after kill");
                }
            }
        }
    }

    /// Release everything a Running session holds and retire it with
    /// `final_status` (Stopped or Failed).
    async fn teardown(&self, id: &str, mut owned: OwnedSession, final_status: SessionStatus) {
        if final_status == SessionStatus::Stopped {
            if let Err(e) = self.registry.transition(id, SessionStatus::Stopping) {
                warn!(session = %id, "{}", e);
            }
        }
        if owned.process.is_alive() {
            self.terminate(id, owned.process.as_mut()).await;
        }
        owned.workdir.release();
        if let Err(e) = self.registry.transition(id, final_status) {
            warn!(session = %id, "{}", e);
        }
        if let Some(session) = self.registry.unregister(id) {
            info!(session = %id, port = session.port, status = %session.status, "Session retired");
        }
    }

    /// Undo a create that never reached Running.
    fn abandon_startup(&self, id: &str, workdir: WorkDir) {
        if let Err(e) = self.registry.transition(id, SessionStatus::Failed) {
            warn!(session = %id, "{}", e);
        }
        workdir.discard();
        self.registry.unregister(id);
    }
}
