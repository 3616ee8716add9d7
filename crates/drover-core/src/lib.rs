//! Drover Core Library
//!
//! This crate provides the process-management and RPC bridge for driving a
//! browser-automation worker subprocess over line-delimited JSON on
//! stdin/stdout, including lifecycle supervision, request correlation,
//! timeout budgeting, and automatic crash recovery.

pub mod bridge;
pub mod config;
pub mod error;
pub mod pending;
pub mod process;
pub mod protocol;
pub mod stderr;
pub mod transport;
pub mod types;
pub mod watchdog;

// Re-export commonly used types
pub use bridge::{ProcessState, WorkerBridge};
pub use config::{BridgeConfig, Sleeper, TimeoutConfig, TokioSleeper, WatchdogConfig};
pub use error::{BridgeError, BridgeResult};
pub use process::{CommandLauncher, LaunchedWorker, ProcessHandle, WorkerLauncher};
pub use protocol::{WireError, WireMessage, WireNotification, WireRequest, WireResponse};
pub use types::*;
