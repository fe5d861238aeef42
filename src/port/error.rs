//! Port-specific error types.
//!
//! These describe what went wrong on the raw byte channel. The session layer
//! maps them onto the user-facing taxonomy in [`crate::error`].

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during serial channel operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The specified serial device was not found on the system.
    #[error("Serial device not found: {0}")]
    NotFound(String),

    /// The platform refused access to the device.
    #[error("Permission denied for serial device: {0}")]
    PermissionDenied(String),

    /// The device is already bound by another session or process.
    #[error("Serial device is busy: {0}")]
    Busy(String),

    /// An I/O error occurred during channel operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel rejected a setting (baud rate, framing, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A read produced no data before the timeout elapsed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The channel has been closed.
    #[error("Channel is closed")]
    Closed,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a device name.
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::NotFound(device.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Whether this error is the expected "no data yet" outcome of a read.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Classify an error returned by `serialport` when opening `device`.
    pub(crate) fn from_open(device: &str, err: serialport::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::not_found(device),
            serialport::ErrorKind::InvalidInput => Self::config(err.to_string()),
            serialport::ErrorKind::Io(Io::NotFound) => Self::not_found(device),
            serialport::ErrorKind::Io(Io::PermissionDenied) => {
                Self::PermissionDenied(device.to_string())
            }
            serialport::ErrorKind::Io(Io::ResourceBusy) => Self::Busy(device.to_string()),
            _ => Self::Serial(err),
        }
    }
}
