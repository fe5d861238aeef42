//! Serial Transport Library
//!
//! Transport core for talking to USB-serial microcontroller boards: device
//! discovery, a single-session connection state machine, a background read
//! loop, and DTR/RTS sequences for reset and bootloader entry.
//!
//! # Modules
//!
//! - `registry`: Device discovery and descriptors
//! - `session`: Transport session state machine
//! - `read_loop`: Background read task
//! - `sequencer`: Reset and bootloader control-line sequences
//! - `activity`: Activity events and sinks
//! - `payload`: Outbound payload helpers
//! - `port`: Port abstraction layer for serial communication
//! - `config`: Configuration management with TOML support
//! - `logging`: Tracing subscriber setup
//! - `error`: Unified error handling
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_transport::{ActivityLog, ControlSequencer, ReadLoop, SystemBackend, TransportSession};
//! use std::sync::Arc;
//!
//! # async fn run() -> serial_transport::TransportResult<()> {
//! let log = Arc::new(ActivityLog::default());
//! let session = Arc::new(TransportSession::new(Arc::new(SystemBackend::new()), log.clone()));
//!
//! let devices = session.list_devices()?;
//! if let Some(device) = devices.first() {
//!     session.connect(&device.name, 115_200).await?;
//!     ReadLoop::new(session.clone()).start().await?;
//!     ControlSequencer::new(session.clone()).reset().await?;
//!     session.disconnect().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod logging;
pub mod payload;
pub mod port;
pub mod read_loop;
pub mod registry;
pub mod sequencer;
pub mod session;

// Re-export commonly used types for convenience
pub use activity::{
    ActivityEvent, ActivityKind, ActivityLog, ActivitySink, Fanout, NullSink, TracingSink,
};
pub use error::{ConnectionError, DiscoveryError, ErrorKind, TransportError, TransportResult};
pub use port::{
    ChannelSettings, DataBits, FlowControl, MockBackend, MockSerialPort, Parity, PortError,
    SerialBackend, SerialChannel, StopBits, SyncSerialPort, SystemBackend,
};
pub use read_loop::ReadLoop;
pub use registry::{DeviceDescriptor, DeviceRegistry};
pub use sequencer::{ControlSequencer, ControlStep};
pub use session::{SessionOptions, SessionPhase, SessionStatus, TransportSession};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
