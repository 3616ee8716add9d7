//! Worker liveness watchdog
//!
//! A fixed-interval probe that detects unexpected worker death and drives
//! bounded automatic recovery. Cooldown spacing stops restart thrash;
//! the attempt budget stops a persistently broken worker binary from
//! spinning the host in an endless restart loop.

use crate::bridge::BridgeInner;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Automatic-restart bookkeeping
///
/// Mutated only by the watchdog recovery path and by a force restart, which
/// resets it. Attempts never pass the configured maximum without an explicit
/// external reset.
#[derive(Debug, Clone, Default)]
pub struct RestartBudget {
    /// Automatic restart attempts since the last reset
    pub attempts: u32,
    /// When the last restart attempt was recorded
    pub last_restart: Option<Instant>,
}

impl RestartBudget {
    /// Fresh budget with no attempts recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last restart is still inside the cooldown window
    pub fn in_cooldown(&self, cooldown: Duration) -> bool {
        self.last_restart
            .is_some_and(|at| at.elapsed() < cooldown)
    }

    /// Whether automatic recovery is out of attempts
    pub fn exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Record one restart attempt, returning the new attempt count
    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.last_restart = Some(Instant::now());
        self.attempts
    }

    /// Reset after an operator-driven restart
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_restart = None;
    }
}

/// Handle over the spawned watchdog task
pub struct Watchdog {
    cancel: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Spawn the probe loop for a bridge
    pub fn spawn(inner: Arc<BridgeInner>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.watchdog.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("watchdog cancelled");
                        break;
                    }
                    _ = ticker.tick() => {}
                }
                inner.watchdog_tick().await;
            }
        });

        Self {
            cancel,
            handle: parking_lot::Mutex::new(Some(handle)),
        }
    }

    /// Cancel the probe loop and wait briefly for it to wind down
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    /// Tear down without waiting; used from Drop
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.abort();
    }
}
