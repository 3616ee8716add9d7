//! Stdio transport
//!
//! Owns the worker's stdin/stdout pair. Writes are serialized under a
//! writer-scoped async mutex so concurrent callers never interleave partial
//! lines. One dedicated reader task owns the read half outright and resolves
//! pending correlations; when it exits (EOF or I/O failure) every
//! still-pending call is resolved exceptionally so no caller blocks forever.

use crate::error::{BridgeError, BridgeResult};
use crate::pending::PendingCalls;
use crate::protocol::WireMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const READER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-delimited JSON transport over the worker's stdio pair
pub struct WorkerTransport {
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    reader_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pending: Arc<PendingCalls>,
    connected: Arc<AtomicBool>,
}

impl WorkerTransport {
    /// Build a transport over arbitrary I/O halves and start the reader task
    ///
    /// Production glue hands in the child's stdin/stdout; tests hand in
    /// in-memory duplex pipes.
    pub fn new<W, R>(writer: W, reader: R, pending: Arc<PendingCalls>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let connected = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            reader_handle: parking_lot::Mutex::new(Some(handle)),
            pending,
            connected,
        }
    }

    /// Encode a message and flush it as one line
    pub async fn send(&self, message: &WireMessage) -> BridgeResult<()> {
        let line = message
            .to_line()
            .map_err(|e| BridgeError::serialization(e.to_string()))?;

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| BridgeError::transport("transport is closed"))?;

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::transport(format!("failed to write request: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::transport(format!("failed to flush request: {e}")))?;

        Ok(())
    }

    /// Whether the reader task still believes the worker is attached
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the write half and stop the reader task
    ///
    /// Dropping the writer signals EOF to the worker's stdin. The reader is
    /// given a short grace to drain, then aborted; anything still pending is
    /// failed so waiters unblock.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();

        let handle = self.reader_handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(READER_SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.pending.fail_all(BridgeError::transport("transport closed"));
    }
}

impl Drop for WorkerTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Drain worker stdout until EOF or failure, resolving correlations
async fn read_loop<R>(reader: R, pending: Arc<PendingCalls>, connected: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("worker stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                dispatch_line(trimmed, &pending);
            }
            Err(e) => {
                warn!(error = %e, "failed to read from worker stdout");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    pending.fail_all(BridgeError::transport("worker connection closed"));
}

fn dispatch_line(line: &str, pending: &PendingCalls) {
    match WireMessage::from_line(line) {
        Ok(WireMessage::Response(response)) => {
            let id = response.id;
            let outcome = response
                .into_result()
                .map_err(|e| BridgeError::worker(e.message));
            if !pending.resolve(id, outcome) {
                // Late reply for a timed-out or duplicate id. Non-fatal.
                warn!(id, "dropping response with no matching pending call");
            }
        }
        Ok(WireMessage::Notification(notification)) => {
            debug!(method = %notification.method, "notification from worker");
        }
        Ok(WireMessage::Request(request)) => {
            warn!(
                id = request.id,
                method = %request.method,
                "unexpected request from worker, ignoring"
            );
        }
        Err(e) => {
            warn!(error = %e, line, "undecodable line from worker");
        }
    }
}
