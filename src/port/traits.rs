//! Core traits for the platform serial collaborator.
//!
//! `SerialChannel` is the raw byte channel of one opened device and
//! `SerialBackend` is the enumeration + open primitive of the host's USB
//! subsystem. Real hardware and the recording mock both implement them, so
//! the session can be driven without a board attached.

use super::error::PortError;
use crate::error::DiscoveryError;
use crate::registry::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Line settings applied when a channel is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Initial read timeout.
    pub timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Raw byte channel of one opened device.
///
/// All methods block the calling thread; the session runs them on the
/// blocking pool and never calls two of them concurrently.
pub trait SerialChannel: Send + std::fmt::Debug {
    /// Get the device handle this channel is bound to.
    fn name(&self) -> &str;

    /// Read whatever is available into `buffer`, waiting up to `timeout`
    /// for the first byte.
    ///
    /// Returns `PortError::Timeout` when nothing arrived in time.
    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError>;

    /// Write bytes to the channel.
    ///
    /// Returns the number of bytes actually accepted, which may be fewer
    /// than `data.len()`.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Block until all accepted bytes have been handed to the device.
    fn flush(&mut self) -> Result<(), PortError>;

    /// Change the baud rate of the open channel.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError>;

    /// Drive the DTR (Data Terminal Ready) line.
    fn write_dtr(&mut self, level: bool) -> Result<(), PortError>;

    /// Drive the RTS (Request To Send) line.
    fn write_rts(&mut self, level: bool) -> Result<(), PortError>;

    /// Release the underlying handle.
    ///
    /// Dropping a channel also releases it; this exists so backends can
    /// report failures and observe the close.
    fn close(&mut self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Device enumeration and open primitive of the host platform.
pub trait SerialBackend: Send + Sync + std::fmt::Debug {
    /// Scan the currently attached serial-capable devices.
    ///
    /// Platforms without serial discovery must return
    /// `DiscoveryError::Unsupported` instead of an empty list.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError>;

    /// Open `device` with the given line settings.
    fn open(
        &self,
        device: &str,
        settings: &ChannelSettings,
    ) -> Result<Box<dyn SerialChannel>, PortError>;
}
