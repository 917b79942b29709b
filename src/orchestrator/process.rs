//! Agent process spawner and teardown.
//!
//! Spawns the agent under test with:
//! - piped `stdin`/`stdout`, fully reserved for the protocol;
//! - `stderr` inherited, so the agent's diagnostics pass through unmodified;
//! - `env_clear()` + a safe variable allowlist, plus the configured extras;
//! - `kill_on_drop(true)`, so a handle dropped without teardown still kills
//!   the process.
//!
//! Teardown is graceful-then-forced: the caller closes the connection (which
//! closes the agent's `stdin`), the handle waits up to the grace period for
//! the process to exit, then kills it. Teardown is idempotent and never
//! fails; problems are logged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::rpc::connection::Connection;
use crate::rpc::handlers::HandlerTable;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable from the harness's environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "RUST_BACKTRACE",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Spawn specification ──────────────────────────────────────────────────────

/// What to launch.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Agent binary.
    pub command: String,
    /// Arguments passed to the agent.
    pub args: Vec<String>,
    /// Extra environment variables on top of [`ALLOWED_ENV_VARS`].
    pub env: HashMap<String, String>,
    /// Working directory; inherits the harness's when `None`.
    pub working_dir: Option<PathBuf>,
    /// How long teardown waits for a voluntary exit before killing.
    pub teardown_grace: Duration,
}

impl From<&AgentConfig> for SpawnSpec {
    fn from(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            teardown_grace: config.teardown_grace(),
        }
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct ProcessState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    terminations: u32,
    exit: Option<ExitStatus>,
}

/// Outcome of a teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Times the process was actually terminated (0 or 1).
    pub terminations: u32,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Whether the grace period elapsed and the process was killed.
    pub forced: bool,
}

/// Shared handle to one spawned agent process.
///
/// Clones refer to the same process; teardown through any clone tears it
/// down for all of them.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    state: Arc<Mutex<ProcessState>>,
    pid: Option<u32>,
    command: String,
    grace: Duration,
}

/// Start the agent process described by `spec`.
///
/// # Errors
///
/// - [`AppError::Process`]`("failed to spawn agent: …")`: OS spawn failure.
/// - [`AppError::Process`]: the agent's stdio could not be captured.
pub async fn spawn(spec: &SpawnSpec) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&spec.env);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn agent '{}': {err}", spec.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;

    let pid = child.id();
    info!(pid = ?pid, command = spec.command, args = ?spec.args, "agent process spawned");

    Ok(ProcessHandle {
        state: Arc::new(Mutex::new(ProcessState {
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(stdout),
            terminations: 0,
            exit: None,
        })),
        pid,
        command: spec.command.clone(),
        grace: spec.teardown_grace,
    })
}

impl ProcessHandle {
    /// OS process identifier at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wire the process's stdio into a connection serving `handlers`.
    ///
    /// # Errors
    ///
    /// [`AppError::Process`] if the streams were already attached or the
    /// process has been torn down.
    pub async fn attach(&self, handlers: HandlerTable) -> Result<Connection> {
        let (stdin, stdout) = {
            let mut state = self.state.lock().await;
            match (state.stdin.take(), state.stdout.take()) {
                (Some(stdin), Some(stdout)) => (stdin, stdout),
                _ => {
                    return Err(AppError::Process(format!(
                        "agent '{}' streams are already attached or torn down",
                        self.command
                    )))
                }
            }
        };

        let label = format!("{}[{}]", handlers.role(), self.pid.unwrap_or(0));
        Ok(Connection::spawn(label, stdout, stdin, handlers))
    }

    /// Terminate the process. Idempotent: only the first call terminates;
    /// later calls return the recorded report with `terminations` unchanged.
    pub async fn teardown(&self) -> TeardownReport {
        let mut state = self.state.lock().await;
        let Some(mut child) = state.child.take() else {
            debug!(pid = ?self.pid, "teardown: already torn down");
            return TeardownReport {
                terminations: state.terminations,
                exit_code: state.exit.and_then(|s| s.code()),
                forced: false,
            };
        };

        // Close stdin if it was never handed to a connection.
        drop(state.stdin.take());
        drop(state.stdout.take());

        let mut forced = false;
        let exit = match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                warn!(pid = ?self.pid, %err, "teardown: error waiting for agent process");
                None
            }
            Err(_elapsed) => {
                forced = true;
                debug!(pid = ?self.pid, grace = ?self.grace, "teardown: grace period elapsed, killing");
                if let Err(err) = child.kill().await {
                    warn!(pid = ?self.pid, %err, "teardown: failed to kill agent process");
                }
                match child.try_wait() {
                    Ok(status) => status,
                    Err(err) => {
                        warn!(pid = ?self.pid, %err, "teardown: failed to reap agent process");
                        None
                    }
                }
            }
        };

        state.terminations += 1;
        state.exit = exit;

        let report = TeardownReport {
            terminations: state.terminations,
            exit_code: exit.and_then(|s| s.code()),
            forced,
        };
        info!(
            pid = ?self.pid,
            exit_code = ?report.exit_code,
            forced,
            "agent process torn down"
        );
        report
    }

    /// Times the process has actually been terminated.
    pub async fn terminations(&self) -> u32 {
        self.state.lock().await.terminations
    }

    /// Whether teardown has run.
    pub async fn is_torn_down(&self) -> bool {
        self.state.lock().await.child.is_none()
    }
}
