//! Worker bridge
//!
//! The public surface of the crate. One bridge owns exactly one worker
//! subprocess at a time and exposes the lifecycle and call operations the
//! orchestrator drives: start, createContext, closeContext, callTool,
//! listTools, forceRestart, close. Every correlated call composes the
//! nested timeout budgets so a worker-reported timeout is observed before
//! the caller-side backstop fires.

use crate::config::{BridgeConfig, Sleeper, TokioSleeper};
use crate::error::{BridgeError, BridgeResult};
use crate::pending::PendingCalls;
use crate::process::{CommandLauncher, ProcessHandle, WorkerLauncher};
use crate::protocol::{methods, WireMessage, WireNotification, WireRequest};
use crate::stderr;
use crate::transport::WorkerTransport;
use crate::types::{CreateContextParams, InitializeResult, ToolDescriptor, ToolListing};
use crate::watchdog::{RestartBudget, Watchdog};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Bridge lifecycle state, single source of truth
///
/// `Closed` is terminal and only reachable through an explicit `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No worker process exists
    Stopped,
    /// Spawn and handshake in progress
    Starting,
    /// Handshake complete, no traffic served yet
    Initialized,
    /// Serving calls
    Running,
    /// Automatic or forced restart in progress
    Restarting,
    /// Restart budget exhausted; only a force restart revives the bridge
    PermanentlyDown,
    /// Shut down for good
    Closed,
}

enum RecoveryDecision {
    Defer,
    GiveUp,
    Attempt(u32),
}

/// Shared internals, visible to the watchdog task
pub(crate) struct BridgeInner {
    pub(crate) config: BridgeConfig,
    launcher: Box<dyn WorkerLauncher>,
    sleeper: Box<dyn Sleeper>,
    state: parking_lot::Mutex<ProcessState>,
    pending: Arc<PendingCalls>,
    transport: parking_lot::Mutex<Option<Arc<WorkerTransport>>>,
    process: parking_lot::Mutex<Option<Arc<dyn ProcessHandle>>>,
    stderr_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Serializes start, force restart, watchdog recovery, and close
    restart_lock: tokio::sync::Mutex<()>,
    budget: parking_lot::Mutex<RestartBudget>,
}

impl BridgeInner {
    pub(crate) fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    /// Closed is sticky: nothing moves the bridge out of it
    pub(crate) fn set_state(&self, next: ProcessState) {
        let mut state = self.state.lock();
        if *state == ProcessState::Closed && next != ProcessState::Closed {
            return;
        }
        if *state != next {
            debug!(from = ?*state, to = ?next, "bridge state change");
            *state = next;
        }
    }

    pub(crate) fn process_alive(&self) -> bool {
        self.process.lock().as_ref().is_some_and(|p| p.is_alive())
    }

    /// States in which the bridge expects a live worker underneath it
    fn believes_initialized(&self) -> bool {
        matches!(
            self.state(),
            ProcessState::Initialized | ProcessState::Running | ProcessState::Restarting
        )
    }

    fn ready_transport(&self) -> BridgeResult<Arc<WorkerTransport>> {
        let state = self.state();
        if !matches!(state, ProcessState::Initialized | ProcessState::Running) {
            return Err(BridgeError::state(format!(
                "bridge cannot serve calls in state {state:?}"
            )));
        }
        if !self.process_alive() {
            return Err(BridgeError::state("worker process is not alive"));
        }
        self.transport
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::state("worker transport is not connected"))
    }

    /// Spawn the worker, wire up transport and stderr drain, run the
    /// initialize handshake
    async fn spawn_and_handshake(&self) -> BridgeResult<()> {
        let worker = self.launcher.launch(&self.config).await?;

        let transport = Arc::new(WorkerTransport::new(
            worker.stdin,
            worker.stdout,
            Arc::clone(&self.pending),
        ));
        let drain = stderr::spawn_drain(worker.stderr);
        let handle: Arc<dyn ProcessHandle> = Arc::from(worker.handle);

        *self.transport.lock() = Some(Arc::clone(&transport));
        *self.process.lock() = Some(handle);
        if let Some(old) = self.stderr_task.lock().replace(drain) {
            old.abort();
        }

        self.initialize_handshake(&transport).await
    }

    /// Send `initialize`, wait for the response within the handshake
    /// budget, acknowledge with the `initialized` notification
    async fn initialize_handshake(&self, transport: &WorkerTransport) -> BridgeResult<()> {
        let params = serde_json::to_value(self.config.initialize_params())
            .map_err(|e| BridgeError::startup(format!("initialize params: {e}")))?;

        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let request = WireRequest::new(id, methods::INITIALIZE).with_params(params);

        if let Err(e) = transport.send(&WireMessage::Request(request)).await {
            self.pending.remove(id);
            return Err(BridgeError::startup(format!(
                "failed to send initialize request: {e}"
            )));
        }

        let budget = self.config.timeouts.initialize;
        let result = match tokio::time::timeout(budget, rx).await {
            Err(_) => {
                self.pending.remove(id);
                return Err(BridgeError::startup(format!(
                    "initialize handshake timed out after {}s",
                    budget.as_secs()
                )));
            }
            Ok(Err(_)) => {
                return Err(BridgeError::startup(
                    "worker went away during the initialize handshake",
                ));
            }
            Ok(Ok(Err(e))) => {
                return Err(BridgeError::startup(format!("initialize failed: {e}")));
            }
            Ok(Ok(Ok(value))) => value,
        };

        if let Ok(init) = serde_json::from_value::<InitializeResult>(result) {
            let worker_name = init.server_info.map(|info| info.name);
            debug!(worker = ?worker_name, "initialize handshake accepted");
        }

        let ack = WireNotification::new(methods::INITIALIZED);
        transport
            .send(&WireMessage::Notification(ack))
            .await
            .map_err(|e| {
                BridgeError::startup(format!("failed to send initialized notification: {e}"))
            })?;

        info!("worker initialized");
        Ok(())
    }

    /// Tear down transport, process, and stderr drain
    ///
    /// Safe on an already-dead worker; each step is best-effort.
    async fn cleanup_process(&self) {
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.close().await;
        }

        let process = self.process.lock().take();
        if let Some(process) = process {
            process.terminate(self.config.kill_grace).await;
        }

        if let Some(drain) = self.stderr_task.lock().take() {
            drain.abort();
        }
    }

    /// One correlated request with the nested timeout budgets
    ///
    /// The entry is registered before the bytes are flushed; a send failure
    /// removes it immediately so no dead entry lingers. The transport budget
    /// (inner + response grace) governs the wait for a reply; the outer
    /// budget (inner + outer grace) is the absolute backstop.
    async fn call(
        &self,
        operation: &str,
        method: &str,
        params: Value,
        inner: Duration,
    ) -> BridgeResult<Value> {
        let transport = self.ready_transport()?;

        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let request = WireRequest::new(id, method).with_params(params);

        let transport_budget = self.config.timeouts.transport_budget(inner);
        let outer_budget = self.config.timeouts.outer_budget(inner);

        let exchange = async {
            if let Err(e) = transport.send(&WireMessage::Request(request)).await {
                self.pending.remove(id);
                return Err(e);
            }
            match tokio::time::timeout(transport_budget, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(BridgeError::transport("response channel dropped")),
                Err(_) => {
                    self.pending.remove(id);
                    warn!(
                        id,
                        method,
                        budget_secs = transport_budget.as_secs(),
                        "no response within the transport budget"
                    );
                    Err(BridgeError::timeout(operation, transport_budget.as_secs()))
                }
            }
        };

        let outcome = match tokio::time::timeout(outer_budget, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.remove(id);
                error!(
                    id,
                    method,
                    budget_secs = outer_budget.as_secs(),
                    "call never resolved, outer backstop fired"
                );
                Err(BridgeError::timeout(operation, outer_budget.as_secs()))
            }
        };

        if outcome.is_ok() && self.state() == ProcessState::Initialized {
            self.set_state(ProcessState::Running);
        }
        outcome
    }

    /// One liveness probe; called by the watchdog on its interval
    pub(crate) async fn watchdog_tick(&self) {
        if !self.believes_initialized() || self.process_alive() {
            return;
        }
        warn!("worker process died unexpectedly");

        let _guard = self.restart_lock.lock().await;
        // Re-check under the lock; a force restart may have beaten us here.
        if !self.believes_initialized() || self.process_alive() {
            return;
        }

        let decision = {
            let mut budget = self.budget.lock();
            if budget.in_cooldown(self.config.watchdog.cooldown) {
                RecoveryDecision::Defer
            } else if budget.exhausted(self.config.watchdog.max_restart_attempts) {
                RecoveryDecision::GiveUp
            } else {
                RecoveryDecision::Attempt(budget.record_attempt())
            }
        };

        match decision {
            RecoveryDecision::Defer => {
                debug!("restart cooldown active, deferring recovery to next tick");
            }
            RecoveryDecision::GiveUp => {
                error!(
                    max_attempts = self.config.watchdog.max_restart_attempts,
                    "restart budget exhausted, bridge is permanently down"
                );
                self.set_state(ProcessState::PermanentlyDown);
                self.cleanup_process().await;
            }
            RecoveryDecision::Attempt(attempt) => {
                warn!(
                    attempt,
                    max_attempts = self.config.watchdog.max_restart_attempts,
                    "attempting automatic worker restart"
                );
                self.set_state(ProcessState::Restarting);
                self.cleanup_process().await;
                self.sleeper.sleep(self.config.watchdog.restart_delay).await;

                match self.spawn_and_handshake().await {
                    Ok(()) => {
                        self.set_state(ProcessState::Running);
                        info!(attempt, "worker restarted after unexpected death");
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "automatic restart failed");
                        self.cleanup_process().await;
                    }
                }
            }
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(drain) = self.stderr_task.lock().take() {
            drain.abort();
        }
    }
}

/// Process-management and RPC bridge over one worker subprocess
pub struct WorkerBridge {
    inner: Arc<BridgeInner>,
    watchdog: parking_lot::Mutex<Option<Watchdog>>,
}

impl WorkerBridge {
    /// Create a bridge that spawns real worker processes
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_launcher(config, Box::new(CommandLauncher))
    }

    /// Create a bridge with a custom launcher
    pub fn with_launcher(config: BridgeConfig, launcher: Box<dyn WorkerLauncher>) -> Self {
        Self::with_launcher_and_sleeper(config, launcher, Box::new(TokioSleeper))
    }

    /// Create a bridge with a custom launcher and restart-delay sleeper
    pub fn with_launcher_and_sleeper(
        config: BridgeConfig,
        launcher: Box<dyn WorkerLauncher>,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                config,
                launcher,
                sleeper,
                state: parking_lot::Mutex::new(ProcessState::Stopped),
                pending: Arc::new(PendingCalls::new()),
                transport: parking_lot::Mutex::new(None),
                process: parking_lot::Mutex::new(None),
                stderr_task: parking_lot::Mutex::new(None),
                restart_lock: tokio::sync::Mutex::new(()),
                budget: parking_lot::Mutex::new(RestartBudget::new()),
            }),
            watchdog: parking_lot::Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.inner.state()
    }

    /// Number of calls currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Spawn the worker and run the initialize handshake
    ///
    /// Idempotent: a live worker makes this a logged no-op. Handshake
    /// failure is fatal here, tears the process down, and leaves the state
    /// `Stopped`; nothing retries at this layer.
    #[instrument(skip(self), level = "debug")]
    pub async fn start(&self) -> BridgeResult<()> {
        let _guard = self.inner.restart_lock.lock().await;

        match self.inner.state() {
            ProcessState::Closed => {
                return Err(BridgeError::state("bridge is closed"));
            }
            ProcessState::PermanentlyDown => {
                return Err(BridgeError::state(
                    "bridge is permanently down, call force_restart",
                ));
            }
            _ => {}
        }
        if self.inner.process_alive() {
            info!("worker already running, start is a no-op");
            return Ok(());
        }

        self.inner.set_state(ProcessState::Starting);
        match self.inner.spawn_and_handshake().await {
            Ok(()) => {
                self.inner.set_state(ProcessState::Initialized);
                self.replace_watchdog().await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "worker startup failed");
                self.inner.cleanup_process().await;
                self.inner.set_state(ProcessState::Stopped);
                Err(e)
            }
        }
    }

    /// Create an isolated browser context for one test run
    ///
    /// Uses the larger context-creation budget: first-time engine startup in
    /// constrained sandboxes is slow and must not look like a stuck call.
    #[instrument(skip(self), fields(run_id = %run_id), level = "debug")]
    pub async fn create_context(&self, record_video: bool, run_id: &str) -> BridgeResult<Value> {
        let params = serde_json::to_value(CreateContextParams {
            video: record_video,
            run_id: run_id.to_string(),
        })?;
        self.inner
            .call(
                "context creation",
                methods::CREATE_CONTEXT,
                params,
                self.inner.config.timeouts.create_context,
            )
            .await
    }

    /// Close the current browser context
    ///
    /// Best-effort in intent, but failures propagate so the caller can
    /// decide between continuing and a force restart.
    #[instrument(skip(self), level = "debug")]
    pub async fn close_context(&self) -> BridgeResult<Value> {
        self.inner
            .call(
                "context close",
                methods::CLOSE_CONTEXT,
                json!({}),
                self.inner.config.timeouts.call,
            )
            .await
    }

    /// Invoke a named worker tool, returning its result payload unchanged
    #[instrument(skip(self, arguments), fields(tool = %name), level = "debug")]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> BridgeResult<Value> {
        let operation = format!("tool call '{name}'");
        self.inner
            .call(
                &operation,
                methods::TOOLS_CALL,
                json!({ "name": name, "arguments": arguments }),
                self.inner.config.timeouts.call,
            )
            .await
    }

    /// List the tools the worker exposes
    #[instrument(skip(self), level = "debug")]
    pub async fn list_tools(&self) -> BridgeResult<Vec<ToolDescriptor>> {
        let result = self
            .inner
            .call(
                "tool listing",
                methods::TOOLS_LIST,
                json!({}),
                self.inner.config.timeouts.call,
            )
            .await?;
        let listing: ToolListing = serde_json::from_value(result)?;
        Ok(listing.tools)
    }

    /// Operator-level restart for a wedged worker
    ///
    /// Resets the restart budget, tears the worker down regardless of
    /// liveness, waits the configured delay, and runs a fresh
    /// spawn+handshake. Serialized with watchdog recovery.
    #[instrument(skip(self), level = "debug")]
    pub async fn force_restart(&self) -> BridgeResult<()> {
        let _guard = self.inner.restart_lock.lock().await;

        if self.inner.state() == ProcessState::Closed {
            return Err(BridgeError::state("bridge is closed"));
        }
        info!("force restart requested");

        self.inner.budget.lock().reset();
        self.inner.set_state(ProcessState::Restarting);
        self.inner.cleanup_process().await;
        self.inner
            .sleeper
            .sleep(self.inner.config.watchdog.restart_delay)
            .await;

        match self.inner.spawn_and_handshake().await {
            Ok(()) => {
                self.inner.set_state(ProcessState::Running);
                self.replace_watchdog().await;
                info!("worker restarted");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "force restart failed");
                self.inner.cleanup_process().await;
                self.inner.set_state(ProcessState::Stopped);
                Err(e)
            }
        }
    }

    /// Shut the bridge down for good
    ///
    /// Unblocks every caller still awaiting a response, stops the watchdog,
    /// and terminates the worker. Idempotent; the bridge cannot be reused
    /// afterwards.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(&self) -> BridgeResult<()> {
        if self.inner.state() == ProcessState::Closed {
            return Ok(());
        }
        info!("closing worker bridge");

        // Sticky-set first so new calls fail fast while teardown runs.
        self.inner.set_state(ProcessState::Closed);

        let watchdog = self.watchdog.lock().take();
        if let Some(watchdog) = watchdog {
            watchdog.stop().await;
        }

        let _guard = self.inner.restart_lock.lock().await;
        // Fail waiters before tearing the transport down so they observe the
        // terminal closed error, not a generic connection loss.
        self.inner.pending.fail_all(BridgeError::Closed);
        self.inner.cleanup_process().await;
        Ok(())
    }

    /// Install a fresh watchdog, stopping any previous one
    async fn replace_watchdog(&self) {
        let old = self.watchdog.lock().take();
        if let Some(old) = old {
            old.stop().await;
        }
        let watchdog = Watchdog::spawn(Arc::clone(&self.inner));
        *self.watchdog.lock() = Some(watchdog);
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.abort();
        }
    }
}
