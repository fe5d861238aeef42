//! Continuous background reading.
//!
//! While running, the loop repeatedly calls [`TransportSession::raw_read`]
//! and forwards received bytes to the activity sink. Timeouts are the normal
//! "nothing arrived" signal and are swallowed; any other failure is reported
//! and the loop keeps going. The loop exits on cancellation or once the
//! session stops being open.
//!
//! Cancellation is checked between iterations, so a read that is already
//! in flight completes (and its data is delivered) before the loop exits.
//! `stop` therefore returns within one read timeout.

use crate::activity::{ActivityEvent, ActivityKind};
use crate::error::{TransportError, TransportResult};
use crate::session::TransportSession;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default wait per read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Upper bound on the pause after a failed read.
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Controller for the session's background read task.
///
/// At most one loop runs per session; the registration lives in the
/// session, so separate `ReadLoop` values for the same session share it.
#[derive(Debug, Clone)]
pub struct ReadLoop {
    session: Arc<TransportSession>,
    read_timeout: Duration,
}

impl ReadLoop {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self {
            session,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Start the loop.
    ///
    /// Returns `Ok(false)` without starting a second task when one is
    /// already running, and `NotConnected` when the session is not open.
    pub async fn start(&self) -> TransportResult<bool> {
        let session = Arc::clone(&self.session);
        let timeout = self.read_timeout;
        let started = self
            .session
            .register_read_loop(move |cancel| tokio::spawn(run(session, cancel, timeout)))
            .await?;

        if started {
            debug!(?timeout, "read loop started");
        } else {
            debug!("read loop already running");
        }
        Ok(started)
    }

    /// Stop the loop and wait for it to exit. Idempotent.
    ///
    /// Once this returns no further read is issued by the loop.
    pub async fn stop(&self) -> bool {
        self.session.stop_read_loop().await
    }

    pub fn is_running(&self) -> bool {
        self.session.status().read_loop_running
    }
}

async fn run(session: Arc<TransportSession>, cancel: CancellationToken, timeout: Duration) {
    session.emit(ActivityEvent::info("Started reading data"));

    while !cancel.is_cancelled() {
        match session.raw_read(timeout).await {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                trace!(bytes = bytes.len(), "received");
                session.emit(
                    ActivityEvent::new(
                        ActivityKind::Receive,
                        format!("RX {} byte(s)", bytes.len()),
                    )
                    .with_payload(bytes),
                );
            }
            Err(e) if e.is_timeout() => {}
            Err(TransportError::NotConnected(phase)) => {
                debug!(%phase, "session no longer open, read loop exiting");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                session.emit(ActivityEvent::error(format!("Read error: {e}")));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(timeout.min(ERROR_BACKOFF)) => {}
                }
            }
        }
    }

    session.set_read_loop_running(false);
    session.emit(ActivityEvent::info("Stopped reading data"));
    debug!("read loop exited");
}
