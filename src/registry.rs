//! Device discovery.
//!
//! The registry performs one scan per call against the platform backend and
//! returns immutable [`DeviceDescriptor`] snapshots. "Not supported" and
//! "supported, none found" stay distinguishable: the former is an error,
//! the latter an empty list.

use crate::error::DiscoveryError;
use crate::port::SerialBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A discoverable serial-capable USB peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque device handle, unique within one discovery pass
    /// (e.g. `/dev/ttyUSB0`, `COM3`).
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub manufacturer_name: Option<String>,
    pub serial_number: Option<String>,
    /// USB device class, when the platform reports it.
    pub device_class: Option<u8>,
    /// USB device subclass, when the platform reports it.
    pub device_subclass: Option<u8>,
    /// Ports exposed by the same physical device.
    pub port_count: usize,
}

impl DeviceDescriptor {
    /// Descriptor for a single-port USB device.
    pub fn usb(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            product_id,
            product_name: None,
            manufacturer_name: None,
            serial_number: None,
            device_class: None,
            device_subclass: None,
            port_count: 1,
        }
    }

    pub fn with_product(mut self, product: Option<String>) -> Self {
        self.product_name = product.filter(|s| !s.is_empty());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: Option<String>) -> Self {
        self.manufacturer_name = manufacturer.filter(|s| !s.is_empty());
        self
    }

    pub fn with_serial_number(mut self, serial: Option<String>) -> Self {
        self.serial_number = serial.filter(|s| !s.is_empty());
        self
    }

    pub fn with_class(mut self, class: u8, subclass: u8) -> Self {
        self.device_class = Some(class);
        self.device_subclass = Some(subclass);
        self
    }

    /// Human-readable label: product name when known, else the handle.
    pub fn label(&self) -> &str {
        self.product_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether `other` describes the same physical hardware: same vendor,
    /// product and serial number. The handle itself is not compared.
    pub fn same_hardware(&self, other: &DeviceDescriptor) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.serial_number == other.serial_number
    }

    /// `VID:PID`, followed by `/serial` when one is reported.
    pub fn hardware_id(&self) -> String {
        match &self.serial_number {
            Some(serial) => format!("{:04X}:{:04X}/{serial}", self.vendor_id, self.product_id),
            None => format!("{:04X}:{:04X}", self.vendor_id, self.product_id),
        }
    }

    /// Grouping key for multi-port devices. Without a serial number two
    /// boards of the same model are indistinguishable, so none is formed.
    fn physical_key(&self) -> Option<(u16, u16, &str)> {
        let serial = self.serial_number.as_deref()?;
        Some((self.vendor_id, self.product_id, serial))
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:04X}:{:04X}] {}",
            self.name,
            self.vendor_id,
            self.product_id,
            self.label()
        )
    }
}

/// Enumerates candidate devices through the platform backend.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn SerialBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn SerialBackend>) -> Self {
        Self { backend }
    }

    /// Scan the attached devices.
    ///
    /// Descriptors are sorted by handle. `port_count` is the number of
    /// handles sharing vendor id, product id and serial number; a device
    /// reporting no serial number always counts as a single port.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DiscoveryError> {
        let mut devices = self.backend.enumerate().inspect_err(|e| {
            warn!(error = %e, "device discovery failed");
        })?;

        let mut counts: HashMap<(u16, u16, String), usize> = HashMap::new();
        for (vid, pid, serial) in devices.iter().filter_map(DeviceDescriptor::physical_key) {
            *counts.entry((vid, pid, serial.to_string())).or_default() += 1;
        }
        for device in &mut devices {
            device.port_count = device
                .physical_key()
                .and_then(|(vid, pid, serial)| counts.get(&(vid, pid, serial.to_string())))
                .copied()
                .unwrap_or(1);
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(count = devices.len(), "discovery pass complete");
        Ok(devices)
    }

    /// Look up a handle in a fresh scan.
    pub fn find(&self, name: &str) -> Result<Option<DeviceDescriptor>, DiscoveryError> {
        Ok(self.list_devices()?.into_iter().find(|d| d.name == name))
    }
}
