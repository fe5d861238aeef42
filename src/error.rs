//! Error taxonomy of the transport core.
//!
//! Every foreground failure is distinguishable by kind so callers can render
//! "device not found" differently from "already connected". `ReadTimeout`
//! is an expected steady-state signal rather than a fault.

use crate::port::PortError;
use crate::session::SessionPhase;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Device enumeration failed.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The host platform has no serial discovery at all.
    #[error("Serial discovery is not supported on {0}")]
    Unsupported(String),

    /// The platform denied enumeration permission.
    #[error("Permission to enumerate USB devices was denied: {0}")]
    PermissionDenied(String),

    /// The platform enumeration call failed for another reason.
    #[error("Device enumeration failed: {0}")]
    Backend(String),
}

/// Opening a session failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Permission denied for device: {0}")]
    PermissionDenied(String),

    #[error("Device is busy: {0}")]
    Busy(String),

    /// The handle is attached but no longer belongs to the listed hardware.
    #[error("Device at {device} changed since it was listed: expected {expected}, found {found}")]
    DeviceChanged {
        device: String,
        expected: String,
        found: String,
    },

    #[error("Session is already connected to {0}. Disconnect before connecting again.")]
    AlreadyConnected(String),

    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// The attached-device check could not enumerate.
    #[error("Could not verify device presence: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The channel could not be opened.
    #[error("Failed to open device: {0}")]
    Open(#[source] PortError),

    /// The channel opened but the initial control-line setup failed.
    #[error("Failed to initialise control lines: {0}")]
    Setup(#[source] PortError),
}

impl ConnectionError {
    /// Classify a backend open failure for `device`.
    pub(crate) fn from_open(device: &str, err: PortError) -> Self {
        match err {
            PortError::NotFound(_) => Self::DeviceNotFound(device.to_string()),
            PortError::PermissionDenied(_) => Self::PermissionDenied(device.to_string()),
            PortError::Busy(_) => Self::Busy(device.to_string()),
            other => Self::Open(other),
        }
    }
}

/// Unified error type of the transport core.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Operation requires an open session, but the session is {0}")]
    NotConnected(SessionPhase),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No data received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Channel error: {0}")]
    Channel(#[source] PortError),
}

/// Flat error classification for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Connection,
    NotConnected,
    Configuration,
    ReadTimeout,
    Channel,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Connection(_) => ErrorKind::Connection,
            Self::NotConnected(_) => ErrorKind::NotConnected,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Self::Channel(_) => ErrorKind::Channel,
        }
    }

    /// Whether this is the expected "no data yet" outcome of a read.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout(_))
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
