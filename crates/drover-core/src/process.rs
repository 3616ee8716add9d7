//! Worker process launch and teardown
//!
//! The worker is an external executable spawned from a fixed working
//! directory with a cleared, explicitly rebuilt environment. The launcher is
//! a trait so tests can substitute an in-memory worker.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Environment variable forcing the worker's runtime mode
pub const RUNTIME_MODE_VAR: &str = "NODE_ENV";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const KILL_REAP_LIMIT: Duration = Duration::from_secs(1);

/// A spawned worker's I/O handles and process handle
pub struct LaunchedWorker {
    /// Worker stdin, the request channel
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Worker stdout, the response channel
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Worker stderr, drained and classified separately
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    /// OS-level process handle
    pub handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for LaunchedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedWorker").finish_non_exhaustive()
    }
}

/// Spawns worker processes
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Spawn the worker described by the config with piped stdio
    async fn launch(&self, config: &BridgeConfig) -> BridgeResult<LaunchedWorker>;
}

/// Liveness and termination control over a spawned process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Whether the OS process is still running
    fn is_alive(&self) -> bool;

    /// OS process id, if the process ever started
    fn id(&self) -> Option<u32>;

    /// Terminate the process: graceful signal first, hard kill after the
    /// grace period. Safe to call on an already-dead process.
    async fn terminate(&self, grace: Duration);
}

/// Default launcher backed by `tokio::process::Command`
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(&self, config: &BridgeConfig) -> BridgeResult<LaunchedWorker> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(&config.working_dir)
            .env_clear();

        // Keep PATH so bare command names still resolve.
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.env(RUNTIME_MODE_VAR, &config.runtime_mode);

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::startup(format!("failed to spawn worker '{}': {e}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::startup("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::startup("worker stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::startup("worker stderr was not captured"))?;

        info!(pid = ?child.id(), command = %config.command, "worker process spawned");

        Ok(LaunchedWorker {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(ChildHandle::new(child)),
        })
    }
}

/// Handle over a real child process
pub struct ChildHandle {
    child: parking_lot::Mutex<Child>,
}

impl ChildHandle {
    fn new(child: Child) -> Self {
        Self {
            child: parking_lot::Mutex::new(child),
        }
    }

    /// Ask the process to exit gracefully; false when no graceful path exists
    fn request_exit(&self) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.id() {
                debug!(pid, "sending SIGTERM to worker");
                return kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok();
            }
            false
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Poll until the process exits or the limit elapses
    async fn wait_for_exit(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn is_alive(&self) -> bool {
        // try_wait also reaps an exited child.
        self.child.lock().try_wait().ok().flatten().is_none()
    }

    fn id(&self) -> Option<u32> {
        self.child.lock().id()
    }

    async fn terminate(&self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        if self.request_exit() {
            if self.wait_for_exit(grace).await {
                debug!("worker exited after termination signal");
                return;
            }
            warn!("worker ignored termination signal, killing");
        }

        {
            let _ = self.child.lock().start_kill();
        }
        self.wait_for_exit(KILL_REAP_LIMIT).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_launch_captures_stdio_and_reports_alive() {
        let config = BridgeConfig::new("cat").with_working_dir(std::env::temp_dir());
        let worker = CommandLauncher.launch(&config).await.unwrap();

        assert!(worker.handle.is_alive());
        assert!(worker.handle.id().is_some());

        worker.handle.terminate(Duration::from_millis(500)).await;
        assert!(!worker.handle.is_alive());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_startup_error() {
        let config = BridgeConfig::new("definitely-not-a-real-binary-xyz");
        let err = CommandLauncher.launch(&config).await.unwrap_err();

        assert!(matches!(err, BridgeError::Startup { .. }));
    }

    #[tokio::test]
    async fn test_runtime_mode_forced_into_environment() {
        let config = BridgeConfig::new("sh")
            .with_arg("-c")
            .with_arg("printf '%s\\n' \"$NODE_ENV\"")
            .with_working_dir(std::env::temp_dir());
        let worker = CommandLauncher.launch(&config).await.unwrap();

        let mut reader = BufReader::new(worker.stdout);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        assert_eq!(line.trim(), "production");
    }

    #[tokio::test]
    async fn test_terminate_is_safe_on_dead_process() {
        let config = BridgeConfig::new("sh")
            .with_arg("-c")
            .with_arg("exit 0")
            .with_working_dir(std::env::temp_dir());
        let worker = CommandLauncher.launch(&config).await.unwrap();

        let handle = worker.handle;
        assert!(wait_until_dead(handle.as_ref(), Duration::from_secs(2)).await);

        // Second teardown on an already-dead process must not panic.
        handle.terminate(Duration::from_millis(100)).await;
        handle.terminate(Duration::from_millis(100)).await;
    }

    async fn wait_until_dead(handle: &dyn ProcessHandle, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while handle.is_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}
