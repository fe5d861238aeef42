//! Mock serial channel and backend for testing.
//!
//! `MockSerialPort` is a recording fake: every channel call is logged with
//! the instant it started, reads block on a condition variable until data
//! is enqueued or the timeout elapses, and failures can be injected per
//! operation. `MockBackend` plays the platform's device list and hands out
//! claimed handles to attached mock ports.

use super::error::PortError;
use super::traits::{ChannelSettings, SerialBackend, SerialChannel};
use crate::error::DiscoveryError;
use crate::registry::DeviceDescriptor;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One call observed by a [`MockSerialPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Read { timeout: Duration },
    Write(Vec<u8>),
    Flush,
    SetBaudRate(u32),
    Dtr(bool),
    Rts(bool),
    Close,
}

impl ChannelCall {
    /// Whether this call drives a control line.
    pub fn is_control_line(&self) -> bool {
        matches!(self, Self::Dtr(_) | Self::Rts(_))
    }
}

/// A call together with the instant it reached the channel.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: ChannelCall,
    pub at: Instant,
}

/// Operation selector for injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Read,
    Write,
    Flush,
    SetBaudRate,
    Dtr,
    Rts,
}

#[derive(Debug, Default)]
struct MockPortState {
    /// Bytes returned by subsequent reads.
    read_queue: VecDeque<u8>,
    /// Every call in arrival order.
    calls: Vec<RecordedCall>,
    /// One-shot failures, consumed by the first matching call.
    failures: VecDeque<(MockOp, String)>,
    /// Upper bound on bytes accepted per write call.
    max_write_chunk: Option<usize>,
    /// Highest baud rate the fake hardware accepts.
    max_baud: Option<u32>,
    /// Artificial latency added to every call.
    op_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
    closed: bool,
    unplugged: bool,
}

impl MockPortState {
    fn take_failure(&mut self, op: MockOp) -> Option<PortError> {
        let idx = self.failures.iter().position(|(o, _)| *o == op)?;
        let (_, message) = self.failures.remove(idx)?;
        Some(PortError::Io(std::io::Error::other(message)))
    }

    fn check_usable(&self) -> Result<(), PortError> {
        if self.unplugged {
            return Err(PortError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        if self.closed {
            return Err(PortError::Closed);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockPortState>,
    data_ready: Condvar,
}

/// Recording fake serial channel.
///
/// Clones share state, so a test keeps one handle while the session owns
/// another.
///
/// # Example
/// ```
/// use serial_transport::port::{ChannelCall, MockSerialPort, SerialChannel};
/// use std::time::Duration;
///
/// let mut port = MockSerialPort::new("usb:1");
/// port.enqueue_read(b"boot:0x13");
///
/// let mut buffer = [0u8; 32];
/// let n = port.read_bytes(&mut buffer, Duration::from_millis(10)).unwrap();
/// assert_eq!(&buffer[..n], b"boot:0x13");
///
/// port.write_dtr(false).unwrap();
/// assert_eq!(port.calls().last().unwrap().call, ChannelCall::Dtr(false));
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    shared: Arc<Shared>,
}

impl MockSerialPort {
    /// Create a new mock channel with the given device handle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Enqueue bytes for subsequent reads and wake a blocked reader.
    pub fn enqueue_read(&self, data: &[u8]) {
        let mut state = self.shared.state.lock();
        state.read_queue.extend(data);
        self.shared.data_ready.notify_all();
    }

    /// Make the next call of kind `op` fail with an I/O error.
    pub fn fail_next(&self, op: MockOp, message: impl Into<String>) {
        self.shared
            .state
            .lock()
            .failures
            .push_back((op, message.into()));
    }

    /// Accept at most `chunk` bytes per write call.
    pub fn set_max_write_chunk(&self, chunk: usize) {
        self.shared.state.lock().max_write_chunk = Some(chunk);
    }

    /// Reject baud rates above `max` as unsupported by the hardware.
    pub fn set_max_baud(&self, max: u32) {
        self.shared.state.lock().max_baud = Some(max);
    }

    /// Add a fixed latency to every call.
    pub fn set_op_delay(&self, delay: Duration) {
        self.shared.state.lock().op_delay = delay;
    }

    /// Simulate the cable being pulled: every later call fails.
    pub fn unplug(&self) {
        let mut state = self.shared.state.lock();
        state.unplugged = true;
        self.shared.data_ready.notify_all();
    }

    /// Get a copy of every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared.state.lock().calls.clone()
    }

    /// Recorded DTR/RTS calls only, in order.
    pub fn control_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.call.is_control_line())
            .collect()
    }

    /// Number of read calls issued so far.
    pub fn read_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c.call, ChannelCall::Read { .. }))
            .count()
    }

    /// Concatenation of all bytes accepted by writes.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.shared
            .state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match &c.call {
                ChannelCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.shared.state.lock().calls.clear();
    }

    /// Highest number of calls ever observed executing at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.shared.state.lock().max_in_flight
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Get the number of bytes waiting to be read.
    pub fn available_bytes(&self) -> usize {
        self.shared.state.lock().read_queue.len()
    }

    /// Reopen a closed mock so the same fake can serve another session.
    pub(crate) fn reopen(&self) {
        self.shared.state.lock().closed = false;
    }

    /// Record `call`, apply latency and fault injection, then run `op`.
    fn invoke<T>(
        &self,
        call: ChannelCall,
        kind: Option<MockOp>,
        op: impl FnOnce(&mut MockPortState) -> Result<T, PortError>,
    ) -> Result<T, PortError> {
        let delay = {
            let mut state = self.shared.state.lock();
            state.calls.push(RecordedCall {
                call,
                at: Instant::now(),
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.op_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.shared.state.lock();
        let result = match kind.and_then(|k| state.take_failure(k)) {
            Some(err) => Err(err),
            None => state.check_usable().and_then(|_| op(&mut state)),
        };
        state.in_flight -= 1;
        result
    }
}

impl SerialChannel for MockSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        {
            let mut state = self.shared.state.lock();
            state.calls.push(RecordedCall {
                call: ChannelCall::Read { timeout },
                at: Instant::now(),
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        let result = loop {
            if let Some(err) = state.take_failure(MockOp::Read) {
                break Err(err);
            }
            if let Err(err) = state.check_usable() {
                break Err(err);
            }
            if !state.read_queue.is_empty() {
                let n = buffer.len().min(state.read_queue.len());
                for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n)) {
                    *slot = byte;
                }
                break Ok(n);
            }
            if self
                .shared
                .data_ready
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.read_queue.is_empty()
                && !state.unplugged
            {
                break Err(PortError::timeout(timeout));
            }
        };
        state.in_flight -= 1;
        result
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let accepted = {
            let state = self.shared.state.lock();
            state
                .max_write_chunk
                .map_or(data.len(), |chunk| data.len().min(chunk))
        };
        let chunk = data[..accepted].to_vec();
        self.invoke(ChannelCall::Write(chunk), Some(MockOp::Write), |_| {
            Ok(accepted)
        })
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.invoke(ChannelCall::Flush, Some(MockOp::Flush), |_| Ok(()))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.invoke(
            ChannelCall::SetBaudRate(baud_rate),
            Some(MockOp::SetBaudRate),
            |state| match state.max_baud {
                Some(max) if baud_rate > max => Err(PortError::config(format!(
                    "baud rate {baud_rate} not supported (max {max})"
                ))),
                _ => Ok(()),
            },
        )
    }

    fn write_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.invoke(ChannelCall::Dtr(level), Some(MockOp::Dtr), |_| Ok(()))
    }

    fn write_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.invoke(ChannelCall::Rts(level), Some(MockOp::Rts), |_| Ok(()))
    }

    fn close(&mut self) -> Result<(), PortError> {
        let mut state = self.shared.state.lock();
        state.calls.push(RecordedCall {
            call: ChannelCall::Close,
            at: Instant::now(),
        });
        state.closed = true;
        self.shared.data_ready.notify_all();
        Ok(())
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

/// How the mock platform answers discovery requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    #[default]
    Supported,
    Unsupported,
    Denied,
}

#[derive(Debug, Default)]
struct MockBackendState {
    devices: Vec<(DeviceDescriptor, MockSerialPort)>,
    discovery: DiscoveryMode,
    denied_open: HashSet<String>,
    open_count: usize,
    last_settings: Option<ChannelSettings>,
}

/// Fake platform backend serving [`MockSerialPort`]s.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device; returns the mock port that will back it.
    pub fn attach(&self, descriptor: DeviceDescriptor) -> MockSerialPort {
        let port = MockSerialPort::new(descriptor.name.clone());
        self.state
            .lock()
            .devices
            .push((descriptor, port.clone()));
        port
    }

    /// Remove a device, failing any channel still bound to it.
    pub fn detach(&self, name: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|(d, port)| {
            if d.name == name {
                port.unplug();
                false
            } else {
                true
            }
        });
    }

    pub fn set_discovery_mode(&self, mode: DiscoveryMode) {
        self.state.lock().discovery = mode;
    }

    /// Make opening `name` fail with a permission error.
    pub fn deny_open(&self, name: impl Into<String>) {
        self.state.lock().denied_open.insert(name.into());
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Settings passed to the most recent successful open.
    pub fn last_settings(&self) -> Option<ChannelSettings> {
        self.state.lock().last_settings.clone()
    }

    /// Whether a channel currently holds `name`.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.claims.lock().contains(name)
    }
}

impl SerialBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        let state = self.state.lock();
        match state.discovery {
            DiscoveryMode::Unsupported => {
                Err(DiscoveryError::Unsupported("mock platform".to_string()))
            }
            DiscoveryMode::Denied => Err(DiscoveryError::PermissionDenied(
                "USB host permission not granted".to_string(),
            )),
            DiscoveryMode::Supported => Ok(state.devices.iter().map(|(d, _)| d.clone()).collect()),
        }
    }

    fn open(
        &self,
        device: &str,
        settings: &ChannelSettings,
    ) -> Result<Box<dyn SerialChannel>, PortError> {
        let mut state = self.state.lock();
        let port = state
            .devices
            .iter()
            .find(|(d, _)| d.name == device)
            .map(|(_, port)| port.clone())
            .ok_or_else(|| PortError::not_found(device))?;

        if state.denied_open.contains(device) {
            return Err(PortError::PermissionDenied(device.to_string()));
        }
        if !self.claims.lock().insert(device.to_string()) {
            return Err(PortError::Busy(device.to_string()));
        }

        port.reopen();
        state.open_count += 1;
        state.last_settings = Some(settings.clone());

        Ok(Box::new(ClaimedPort {
            port,
            claims: Arc::clone(&self.claims),
        }))
    }
}

/// A mock port bound to a session; releases its claim when dropped.
#[derive(Debug)]
struct ClaimedPort {
    port: MockSerialPort,
    claims: Arc<Mutex<HashSet<String>>>,
}

impl SerialChannel for ClaimedPort {
    fn name(&self) -> &str {
        self.port.name()
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        self.port.read_bytes(buffer, timeout)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.port.write_bytes(data)
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.port.flush()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.port.set_baud_rate(baud_rate)
    }

    fn write_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.port.write_dtr(level)
    }

    fn write_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.port.write_rts(level)
    }

    fn close(&mut self) -> Result<(), PortError> {
        self.port.close()
    }
}

impl Drop for ClaimedPort {
    fn drop(&mut self) {
        self.claims.lock().remove(self.port.name());
    }
}
