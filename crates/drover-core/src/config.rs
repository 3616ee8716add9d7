//! Bridge configuration
//!
//! Immutable configuration passed at construction. All timeout budgets and
//! restart numbers live here so tests can shrink them.

use crate::protocol::PROTOCOL_VERSION;
use crate::types::{BrowserConfig, BrowserEngine, ClientCapabilities, ClientInfo, InitializeParams, SnapshotMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_runtime_mode() -> String {
    "production".to_string()
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(2)
}

/// Timeout budgets for correlated calls
///
/// Three nested budgets, strictly increasing outward: the worker-side
/// operation budget, plus grace for the worker to flush an error after
/// hitting its own budget, plus an absolute caller-side backstop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Worker-side budget for a steady-state tool call
    #[serde(with = "humantime_serde")]
    pub call: Duration,
    /// Worker-side budget for context creation (engine startup is slower
    /// in constrained sandboxes, so this is deliberately larger)
    #[serde(with = "humantime_serde")]
    pub create_context: Duration,
    /// Budget for the initialize handshake
    #[serde(with = "humantime_serde")]
    pub initialize: Duration,
    /// Slack past the inner budget for an error response to arrive
    #[serde(with = "humantime_serde")]
    pub response_grace: Duration,
    /// Slack past the inner budget before the caller-side backstop fires
    #[serde(with = "humantime_serde")]
    pub outer_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(60),
            create_context: Duration::from_secs(90),
            initialize: Duration::from_secs(60),
            response_grace: Duration::from_secs(5),
            outer_grace: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    /// Budget applied to the correlation handle await
    pub fn transport_budget(&self, inner: Duration) -> Duration {
        inner + self.response_grace
    }

    /// Absolute backstop wrapping the whole send and await sequence
    pub fn outer_budget(&self, inner: Duration) -> Duration {
        inner + self.outer_grace
    }
}

/// Watchdog and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Liveness probe interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Minimum spacing between automatic restarts
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Automatic restart attempts before giving up
    pub max_restart_attempts: u32,
    /// Delay between teardown and respawn
    #[serde(with = "humantime_serde")]
    pub restart_delay: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(10),
            max_restart_attempts: 3,
            restart_delay: Duration::from_millis(500),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Worker executable
    pub command: String,
    /// Worker arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Fixed working directory the worker is spawned from
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Explicit environment passed to the worker (the environment is
    /// cleared first, nothing else leaks through)
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Value of the worker's runtime-mode environment variable
    #[serde(default = "default_runtime_mode")]
    pub runtime_mode: String,
    /// Timeout budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Watchdog and restart policy
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Grace for the worker to exit after a termination signal before a
    /// hard kill
    #[serde(default = "default_kill_grace", with = "humantime_serde")]
    pub kill_grace: Duration,
    /// Browser payload sent in the initialize handshake
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Protocol version advertised to the worker
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Client identity advertised to the worker
    #[serde(default)]
    pub client_info: ClientInfo,
}

impl BridgeConfig {
    /// Create a config for the given worker executable
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            env: HashMap::new(),
            runtime_mode: default_runtime_mode(),
            timeouts: TimeoutConfig::default(),
            watchdog: WatchdogConfig::default(),
            kill_grace: default_kill_grace(),
            browser: BrowserConfig::default(),
            protocol_version: default_protocol_version(),
            client_info: ClientInfo::default(),
        }
    }

    /// Append an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the steady-state tool-call budget
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.call = timeout;
        self
    }

    /// Set the context-creation budget
    pub fn with_create_context_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.create_context = timeout;
        self
    }

    /// Set the handshake budget
    pub fn with_initialize_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.initialize = timeout;
        self
    }

    /// Set the watchdog probe interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog.interval = interval;
        self
    }

    /// Set the restart cooldown window
    pub fn with_restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.watchdog.cooldown = cooldown;
        self
    }

    /// Set the automatic restart budget
    pub fn with_max_restart_attempts(mut self, attempts: u32) -> Self {
        self.watchdog.max_restart_attempts = attempts;
        self
    }

    /// Set the delay between teardown and respawn
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.watchdog.restart_delay = delay;
        self
    }

    /// Set the browser engine
    pub fn with_engine(mut self, engine: BrowserEngine) -> Self {
        self.browser.engine = engine;
        self
    }

    /// Set the snapshot mode
    pub fn with_snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.browser.snapshot_mode = mode;
        self
    }

    /// Build the initialize handshake payload
    pub fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: self.client_info.clone(),
            browser_config: self.browser.clone(),
        }
    }
}

/// Async sleep hook, injectable so restart sequencing is deterministic in
/// tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Default sleeper backed by the tokio timer
#[derive(Debug, Clone, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
