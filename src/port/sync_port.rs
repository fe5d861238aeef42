//! Hardware-backed channel and backend.
//!
//! Wraps the `serialport` crate's `SerialPort` trait with our own
//! `SerialChannel` trait, and its port enumeration with `SerialBackend`.

use super::error::PortError;
use super::traits::{ChannelSettings, SerialBackend, SerialChannel};
use crate::error::DiscoveryError;
use crate::registry::DeviceDescriptor;
use serialport::SerialPortType;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Serial channel wrapping `serialport::SerialPort`.
pub struct SyncSerialPort {
    /// The underlying serial port implementation.
    port: Box<dyn serialport::SerialPort>,
    /// The device handle for identification.
    name: String,
    /// Read timeout currently programmed into the port.
    timeout: Duration,
}

impl SyncSerialPort {
    /// Open a serial device with the given settings.
    ///
    /// # Example
    /// ```no_run
    /// use serial_transport::port::{ChannelSettings, SyncSerialPort};
    ///
    /// let port = SyncSerialPort::open("/dev/ttyUSB0", &ChannelSettings::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(device: &str, settings: &ChannelSettings) -> Result<Self, PortError> {
        let port = serialport::new(device, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .flow_control(settings.flow_control.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .timeout(settings.timeout)
            .open()
            .map_err(|e| PortError::from_open(device, e))?;

        Ok(Self {
            port,
            name: device.to_string(),
            timeout: settings.timeout,
        })
    }

    /// Get a reference to the underlying serialport implementation.
    pub fn as_raw(&self) -> &dyn serialport::SerialPort {
        &*self.port
    }
}

impl SerialChannel for SyncSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, PortError> {
        if self.timeout != timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }

        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Err(PortError::timeout(timeout))
            }
            Err(e) => Err(PortError::Io(e)),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        self.port.write(data).map_err(PortError::Io)
    }

    fn flush(&mut self) -> Result<(), PortError> {
        self.port.flush().map_err(PortError::Io)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), PortError> {
        self.port.set_baud_rate(baud_rate).map_err(|e| match e.kind() {
            serialport::ErrorKind::InvalidInput => PortError::config(e.to_string()),
            _ => PortError::Serial(e),
        })
    }

    fn write_dtr(&mut self, level: bool) -> Result<(), PortError> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(PortError::Serial)
    }

    fn write_rts(&mut self, level: bool) -> Result<(), PortError> {
        self.port.write_request_to_send(level).map_err(PortError::Serial)
    }
}

impl std::fmt::Debug for SyncSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSerialPort")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Backend talking to the host's serial subsystem through `serialport`.
///
/// Only USB ports are reported, since the other port types carry no
/// vendor/product identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether `serialport` can enumerate devices on this platform.
    pub const fn discovery_supported() -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "windows",
            target_os = "freebsd"
        ))
    }
}

impl SerialBackend for SystemBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        if !Self::discovery_supported() {
            return Err(DiscoveryError::Unsupported(std::env::consts::OS.to_string()));
        }

        let ports = serialport::available_ports().map_err(|e| match e.kind() {
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                DiscoveryError::PermissionDenied(e.to_string())
            }
            _ => DiscoveryError::Backend(e.to_string()),
        })?;

        let mut devices = Vec::new();
        for port in ports {
            match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    devices.push(
                        DeviceDescriptor::usb(port.port_name, usb.vid, usb.pid)
                            .with_product(usb.product)
                            .with_manufacturer(usb.manufacturer)
                            .with_serial_number(usb.serial_number),
                    );
                }
                other => trace!(port = %port.port_name, kind = ?other, "skipping non-USB port"),
            }
        }

        debug!(count = devices.len(), "enumerated USB serial ports");
        Ok(devices)
    }

    fn open(
        &self,
        device: &str,
        settings: &ChannelSettings,
    ) -> Result<Box<dyn SerialChannel>, PortError> {
        Ok(Box::new(SyncSerialPort::open(device, settings)?))
    }
}
