//! Transport session: lifecycle of the single active connection.
//!
//! # State machine
//!
//! ```text
//! Closed ──connect──> Opening ──ok──> Open ──disconnect──> Closing ──> Closed
//!                        └───err───> Closed
//! ```
//!
//! # Concurrency
//!
//! - Channel access is serialized by one mutex around the channel slot; every
//!   channel call runs on the blocking pool while holding it, so reads from
//!   the read loop and foreground writes never interleave at the channel.
//!   Reads hold it for at most [`READ_SLICE`] at a time.
//! - Mutating operations (`connect`, `disconnect`, baud rate, DTR, RTS) are
//!   additionally serialized by an async operation lock.
//! - `disconnect` stops and awaits the read loop before releasing the handle.

use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::error::{ConnectionError, TransportError, TransportResult};
use crate::port::{ChannelSettings, PortError, SerialBackend, SerialChannel};
use crate::registry::{DeviceDescriptor, DeviceRegistry};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of bytes requested per read.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Longest single channel read; bounds how long a pending `raw_read` can
/// keep other callers off the channel.
pub const READ_SLICE: Duration = Duration::from_millis(20);

/// Lifecycle phase of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        })
    }
}

/// Settings applied by [`TransportSession::connect`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Framing and initial timeout; the baud rate comes from `connect`.
    pub settings: ChannelSettings,
    /// DTR level driven right after opening.
    pub initial_dtr: bool,
    /// RTS level driven right after opening.
    pub initial_rts: bool,
    /// Maximum bytes returned by one `raw_read`.
    pub read_chunk: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            settings: ChannelSettings::default(),
            initial_dtr: true,
            initial_rts: true,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub dtr: bool,
    pub rts: bool,
    pub bytes_read_total: u64,
    pub bytes_written_total: u64,
    pub read_loop_running: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    phase: SessionPhase,
    device: Option<String>,
    baud_rate: Option<u32>,
    dtr: bool,
    rts: bool,
    bytes_read_total: u64,
    bytes_written_total: u64,
    read_loop_running: bool,
}

type ChannelSlot = Arc<Mutex<Option<Box<dyn SerialChannel>>>>;

/// Registration of the running read loop.
pub(crate) struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The single connection owned by the composing application.
///
/// Share it as `Arc<TransportSession>` between the read loop, the control
/// sequencer and foreground callers.
pub struct TransportSession {
    registry: DeviceRegistry,
    backend: Arc<dyn SerialBackend>,
    options: SessionOptions,
    sink: Arc<dyn ActivitySink>,
    state: Mutex<SessionState>,
    channel: ChannelSlot,
    ops: tokio::sync::Mutex<()>,
    read_loop: tokio::sync::Mutex<Option<LoopHandle>>,
    sequence: tokio::sync::Mutex<()>,
}

impl TransportSession {
    /// Create a closed session with default options.
    pub fn new(backend: Arc<dyn SerialBackend>, sink: Arc<dyn ActivitySink>) -> Self {
        Self::with_options(backend, sink, SessionOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn SerialBackend>,
        sink: Arc<dyn ActivitySink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new(Arc::clone(&backend)),
            backend,
            options,
            sink,
            state: Mutex::new(SessionState::default()),
            channel: Arc::new(Mutex::new(None)),
            ops: tokio::sync::Mutex::new(()),
            read_loop: tokio::sync::Mutex::new(None),
            sequence: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Scan attached devices through the session's registry.
    pub fn list_devices(&self) -> TransportResult<Vec<DeviceDescriptor>> {
        Ok(self.registry.list_devices()?)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn is_open(&self) -> bool {
        self.phase() == SessionPhase::Open
    }

    pub fn status(&self) -> SessionStatus {
        let st = self.state.lock();
        SessionStatus {
            phase: st.phase,
            device: st.device.clone(),
            baud_rate: st.baud_rate,
            dtr: st.dtr,
            rts: st.rts,
            bytes_read_total: st.bytes_read_total,
            bytes_written_total: st.bytes_written_total,
            read_loop_running: st.read_loop_running,
        }
    }

    /// Open the handle `device` at `baud_rate`.
    ///
    /// The handle must still be attached at call time, otherwise this fails
    /// with `DeviceNotFound`. Whatever hardware currently sits at that path
    /// is opened; use [`connect_descriptor`](Self::connect_descriptor) to
    /// pin the identity seen during discovery. On success DTR and RTS are
    /// driven to the configured initial levels (both HIGH by default).
    pub async fn connect(&self, device: &str, baud_rate: u32) -> TransportResult<()> {
        self.connect_checked(device, None, baud_rate).await
    }

    /// Open a device returned by an earlier [`list_devices`](Self::list_devices).
    ///
    /// A fresh scan must show the same vendor id, product id and serial
    /// number at the descriptor's handle. A detached device fails with
    /// `DeviceNotFound`; different hardware at the same path fails with
    /// `DeviceChanged` and is never opened.
    pub async fn connect_descriptor(
        &self,
        descriptor: &DeviceDescriptor,
        baud_rate: u32,
    ) -> TransportResult<()> {
        self.connect_checked(&descriptor.name, Some(descriptor.clone()), baud_rate)
            .await
    }

    async fn connect_checked(
        &self,
        device: &str,
        expected: Option<DeviceDescriptor>,
        baud_rate: u32,
    ) -> TransportResult<()> {
        let _ops = self.ops.lock().await;

        {
            let mut st = self.state.lock();
            if st.phase != SessionPhase::Closed {
                return Err(ConnectionError::AlreadyConnected(
                    st.device.clone().unwrap_or_default(),
                )
                .into());
            }
            if baud_rate == 0 {
                return Err(ConnectionError::InvalidBaudRate(baud_rate).into());
            }
            st.phase = SessionPhase::Opening;
            st.device = Some(device.to_string());
        }

        info!(device, baud_rate, "connecting");
        match self.open_channel(device, expected, baud_rate).await {
            Ok(channel) => {
                *self.channel.lock() = Some(channel);
                {
                    let mut st = self.state.lock();
                    *st = SessionState {
                        phase: SessionPhase::Open,
                        device: Some(device.to_string()),
                        baud_rate: Some(baud_rate),
                        dtr: self.options.initial_dtr,
                        rts: self.options.initial_rts,
                        ..SessionState::default()
                    };
                }
                info!(device, baud_rate, "connected");
                self.emit(ActivityEvent::new(
                    ActivityKind::Connection,
                    format!("Connected to {device} at {baud_rate} baud"),
                ));
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = SessionState::default();
                warn!(device, error = %err, "connection failed");
                self.emit(ActivityEvent::error(format!("Connection error: {err}")));
                Err(err)
            }
        }
    }

    async fn open_channel(
        &self,
        device: &str,
        expected: Option<DeviceDescriptor>,
        baud_rate: u32,
    ) -> TransportResult<Box<dyn SerialChannel>> {
        let registry = self.registry.clone();
        let backend = Arc::clone(&self.backend);
        let settings = ChannelSettings {
            baud_rate,
            ..self.options.settings.clone()
        };
        let (dtr, rts) = (self.options.initial_dtr, self.options.initial_rts);
        let name = device.to_string();

        let opened = tokio::task::spawn_blocking(move || -> Result<Box<dyn SerialChannel>, ConnectionError> {
            let Some(current) = registry.find(&name)? else {
                return Err(ConnectionError::DeviceNotFound(name));
            };
            if let Some(expected) = expected.filter(|e| !e.same_hardware(&current)) {
                return Err(ConnectionError::DeviceChanged {
                    device: name,
                    expected: expected.hardware_id(),
                    found: current.hardware_id(),
                });
            }

            let mut channel = backend
                .open(&name, &settings)
                .map_err(|e| ConnectionError::from_open(&name, e))?;

            if let Err(e) = channel.write_dtr(dtr).and_then(|_| channel.write_rts(rts)) {
                if let Err(close_err) = channel.close() {
                    warn!(device = %name, error = %close_err, "close after failed setup also failed");
                }
                return Err(ConnectionError::Setup(e));
            }
            Ok(channel)
        })
        .await
        .map_err(join_error)?;

        Ok(opened?)
    }

    /// Close the session. Idempotent: a closed session is left untouched.
    ///
    /// The read loop is stopped and awaited before the handle is released.
    pub async fn disconnect(&self) {
        let _ops = self.ops.lock().await;

        let device = {
            let mut st = self.state.lock();
            if st.phase == SessionPhase::Closed {
                debug!("disconnect on a closed session");
                return;
            }
            st.phase = SessionPhase::Closing;
            st.device.clone().unwrap_or_default()
        };

        info!(device = %device, "disconnecting");
        self.stop_read_loop().await;

        let slot = Arc::clone(&self.channel);
        let closed = tokio::task::spawn_blocking(move || {
            slot.lock().take().map(|mut channel| channel.close())
        })
        .await;
        match closed {
            Ok(Some(Err(e))) => warn!(device = %device, error = %e, "channel close reported an error"),
            Err(e) => warn!(device = %device, error = %e, "channel close task failed"),
            Ok(_) => {}
        }

        *self.state.lock() = SessionState::default();
        info!(device = %device, "disconnected");
        self.emit(ActivityEvent::new(
            ActivityKind::Connection,
            format!("Disconnected from {device}"),
        ));
    }

    /// Write every byte of `data`, retrying partial writes, then flush.
    pub async fn write(&self, data: &[u8]) -> TransportResult<()> {
        let payload = data.to_vec();
        let len = payload.len();
        self.run_on_channel(move |channel| write_all(channel, &payload))
            .await?
            .map_err(TransportError::Channel)?;

        self.state.lock().bytes_written_total += len as u64;
        debug!(bytes = len, "write complete");
        self.emit(
            ActivityEvent::new(ActivityKind::Transmit, format!("TX {len} byte(s)"))
                .with_payload(data.to_vec()),
        );
        Ok(())
    }

    /// Wait up to `timeout` for data and return what arrived.
    ///
    /// The wait is split into channel reads of at most [`READ_SLICE`], and
    /// the channel is released between them, so writes and control-line
    /// changes from other tasks are delayed by one slice at most. A timeout
    /// is reported as `TransportError::ReadTimeout`, never as an empty
    /// success.
    pub async fn raw_read(&self, timeout: Duration) -> TransportResult<Vec<u8>> {
        let chunk = self.options.read_chunk.max(1);
        let deadline = Instant::now() + timeout;

        loop {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(READ_SLICE);
            let outcome = self
                .run_on_channel(move |channel| {
                    let mut buffer = vec![0u8; chunk];
                    let n = channel.read_bytes(&mut buffer, slice)?;
                    buffer.truncate(n);
                    Ok(buffer)
                })
                .await?;

            match outcome {
                Ok(bytes) if !bytes.is_empty() => {
                    self.state.lock().bytes_read_total += bytes.len() as u64;
                    return Ok(bytes);
                }
                Ok(_) => {}
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(TransportError::Channel(e)),
            }
            if Instant::now() >= deadline {
                return Err(TransportError::ReadTimeout(timeout));
            }
        }
    }

    /// Change the baud rate of the open channel.
    ///
    /// A zero rate, or one the hardware rejects, fails with
    /// `Configuration` and leaves the recorded rate unchanged.
    pub async fn set_baud_rate(&self, baud_rate: u32) -> TransportResult<()> {
        let _ops = self.ops.lock().await;
        self.ensure_open()?;
        if baud_rate == 0 {
            return Err(TransportError::configuration(
                "baud rate must be a positive integer",
            ));
        }

        let outcome = self
            .run_on_channel(move |channel| channel.set_baud_rate(baud_rate))
            .await?;
        match outcome {
            Ok(()) => {
                self.state.lock().baud_rate = Some(baud_rate);
                info!(baud_rate, "baud rate changed");
                self.emit(ActivityEvent::info(format!(
                    "Baud rate changed to {baud_rate}"
                )));
                Ok(())
            }
            Err(PortError::Config(message)) => Err(TransportError::Configuration(message)),
            Err(e) => Err(TransportError::Channel(e)),
        }
    }

    /// Drive DTR to `level` and remember it.
    pub async fn set_dtr(&self, level: bool) -> TransportResult<()> {
        self.set_control_line(ControlLine::Dtr, level).await
    }

    /// Drive RTS to `level` and remember it.
    pub async fn set_rts(&self, level: bool) -> TransportResult<()> {
        self.set_control_line(ControlLine::Rts, level).await
    }

    async fn set_control_line(&self, line: ControlLine, level: bool) -> TransportResult<()> {
        let _ops = self.ops.lock().await;
        self.ensure_open()?;

        self.run_on_channel(move |channel| match line {
            ControlLine::Dtr => channel.write_dtr(level),
            ControlLine::Rts => channel.write_rts(level),
        })
        .await?
        .map_err(TransportError::Channel)?;

        {
            let mut st = self.state.lock();
            match line {
                ControlLine::Dtr => st.dtr = level,
                ControlLine::Rts => st.rts = level,
            }
        }
        debug!(line = ?line, level, "control line set");
        self.emit(ActivityEvent::new(
            ActivityKind::ControlLine,
            format!("{line} set to {}", if level { "HIGH" } else { "LOW" }),
        ));
        Ok(())
    }

    fn ensure_open(&self) -> TransportResult<()> {
        match self.phase() {
            SessionPhase::Open => Ok(()),
            phase => Err(TransportError::NotConnected(phase)),
        }
    }

    /// Run `op` against the bound channel on the blocking pool.
    ///
    /// The outer error covers "not open"; the inner one is whatever the
    /// channel reported.
    async fn run_on_channel<T, F>(&self, op: F) -> TransportResult<Result<T, PortError>>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialChannel) -> Result<T, PortError> + Send + 'static,
    {
        self.ensure_open()?;
        let slot = Arc::clone(&self.channel);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock();
            let result = guard.as_mut().map(|channel| op(channel.as_mut()));
            // Hand the channel straight to a waiting caller so a looping
            // reader cannot reacquire it first.
            MutexGuard::unlock_fair(guard);
            result
        })
        .await
        .map_err(join_error)?;

        outcome.ok_or_else(|| TransportError::NotConnected(self.phase()))
    }

    pub(crate) fn emit(&self, event: ActivityEvent) {
        self.sink.record(event);
    }

    pub(crate) fn set_read_loop_running(&self, running: bool) {
        self.state.lock().read_loop_running = running;
    }

    /// Register a read loop unless one is already running.
    ///
    /// Returns `Ok(false)` when a live loop exists. `spawn` receives the
    /// loop's cancellation token.
    pub(crate) async fn register_read_loop<F>(&self, spawn: F) -> TransportResult<bool>
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut slot = self.read_loop.lock().await;
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Ok(false);
        }
        self.ensure_open()?;

        let cancel = CancellationToken::new();
        self.set_read_loop_running(true);
        let task = spawn(cancel.clone());
        *slot = Some(LoopHandle { cancel, task });
        Ok(true)
    }

    /// Cancel the registered read loop and wait for it to exit.
    ///
    /// Returns whether a loop was registered.
    pub(crate) async fn stop_read_loop(&self) -> bool {
        let handle = self.read_loop.lock().await.take();
        let Some(LoopHandle { cancel, task }) = handle else {
            return false;
        };

        cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "read loop task ended abnormally");
            self.set_read_loop_running(false);
        }
        true
    }

    /// Lock held for the duration of a control-line sequence.
    pub(crate) async fn lock_sequence(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.sequence.lock().await
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("backend", &self.backend)
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlLine {
    Dtr,
    Rts,
}

impl std::fmt::Display for ControlLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dtr => "DTR",
            Self::Rts => "RTS",
        })
    }
}

fn write_all(channel: &mut dyn SerialChannel, mut data: &[u8]) -> Result<(), PortError> {
    while !data.is_empty() {
        match channel.write_bytes(data) {
            Ok(0) => {
                return Err(PortError::Io(std::io::Error::from(
                    std::io::ErrorKind::WriteZero,
                )))
            }
            Ok(n) => data = &data[n..],
            Err(PortError::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    channel.flush()
}

fn join_error(err: tokio::task::JoinError) -> TransportError {
    TransportError::Channel(PortError::Io(std::io::Error::other(err)))
}
