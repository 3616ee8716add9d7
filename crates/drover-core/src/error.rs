//! Bridge error types

use thiserror::Error;

/// Result alias used across the crate
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the worker bridge
///
/// Worker-reported failures carry the worker's free-text message verbatim;
/// there are no enumerable worker error codes.
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    /// Spawn or handshake failure during start
    #[error("Worker startup failed: {message}")]
    Startup {
        message: String,
        context: Option<String>,
    },

    /// The outer call budget elapsed with no response at all
    #[error("{operation} timed out after {seconds} seconds")]
    Timeout {
        operation: String,
        seconds: u64,
        context: Option<String>,
    },

    /// Error reported by the worker for a correlated request
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        context: Option<String>,
    },

    /// I/O failure on the stdio pipe
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        context: Option<String>,
    },

    /// Malformed or unexpected wire message
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        context: Option<String>,
    },

    /// The bridge is not in a state that can serve the call
    #[error("Invalid bridge state: {message}")]
    State {
        message: String,
        context: Option<String>,
    },

    /// The bridge was closed while the call was in flight
    #[error("Bridge closed")]
    Closed,
}

impl BridgeError {
    /// Create a new Startup error
    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
            context: None,
        }
    }

    /// Create a new Worker error carrying the worker's message verbatim
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            context: None,
        }
    }

    /// Create a new State error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to any bridge error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = Some(context.into());
        match &mut self {
            Self::Startup { context: c, .. } => *c = ctx,
            Self::Timeout { context: c, .. } => *c = ctx,
            Self::Worker { context: c, .. } => *c = ctx,
            Self::Transport { context: c, .. } => *c = ctx,
            Self::Protocol { context: c, .. } => *c = ctx,
            Self::Serialization { context: c, .. } => *c = ctx,
            Self::State { context: c, .. } => *c = ctx,
            Self::Closed => {}
        }
        self
    }

    /// True for the distinct call-timeout condition
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the worker itself reported the failure
    pub fn is_worker_error(&self) -> bool {
        matches!(self, Self::Worker { .. })
    }

    /// Whether retrying the same call could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Worker { .. } | Self::Transport { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}
