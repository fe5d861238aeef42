//! Device discovery E2E tests.
//!
//! Tests cover:
//! - Empty scans versus unsupported platforms
//! - Descriptor contents and ordering
//! - Multi-port grouping
//! - Discovery failures surfacing through connect

use crate::common::{ch340_board, esp32_board};
use pretty_assertions::assert_eq;
use serial_transport::port::{DiscoveryMode, MockBackend};
use serial_transport::{
    ActivityLog, ConnectionError, DeviceDescriptor, DeviceRegistry, DiscoveryError, ErrorKind,
    TransportError, TransportSession,
};
use std::sync::Arc;

fn registry(backend: &MockBackend) -> DeviceRegistry {
    DeviceRegistry::new(Arc::new(backend.clone()))
}

#[test]
fn test_no_devices_is_empty_list() {
    let backend = MockBackend::new();
    assert_eq!(registry(&backend).list_devices().unwrap(), vec![]);
}

#[test]
fn test_unsupported_and_denied_are_errors() {
    let backend = MockBackend::new();
    backend.attach(esp32_board("/dev/ttyUSB0"));

    backend.set_discovery_mode(DiscoveryMode::Unsupported);
    let err: TransportError = registry(&backend).list_devices().unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::Discovery);

    backend.set_discovery_mode(DiscoveryMode::Denied);
    assert!(matches!(
        registry(&backend).list_devices(),
        Err(DiscoveryError::PermissionDenied(_))
    ));
}

#[test]
fn test_descriptor_contents() {
    let backend = MockBackend::new();
    backend.attach(esp32_board("/dev/ttyUSB0").with_class(0xff, 0x00));

    let devices = registry(&backend).list_devices().unwrap();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.vendor_id, 0x10c4);
    assert_eq!(device.product_id, 0xea60);
    assert_eq!(device.manufacturer_name.as_deref(), Some("Silicon Labs"));
    assert_eq!(device.device_class, Some(0xff));
    assert_eq!(device.port_count, 1);
    assert_eq!(
        device.to_string(),
        "/dev/ttyUSB0 [10C4:EA60] CP2102 USB to UART Bridge Controller"
    );
}

#[test]
fn test_dual_port_bridge_is_grouped() {
    let backend = MockBackend::new();
    for name in ["/dev/ttyUSB3", "/dev/ttyUSB2"] {
        backend.attach(
            DeviceDescriptor::usb(name, 0x0403, 0x6010).with_serial_number(Some("FT4X2".into())),
        );
    }
    backend.attach(ch340_board("/dev/ttyUSB1"));

    let devices = registry(&backend).list_devices().unwrap();
    let summary: Vec<_> = devices
        .iter()
        .map(|d| (d.name.as_str(), d.port_count))
        .collect();
    assert_eq!(
        summary,
        [("/dev/ttyUSB1", 1), ("/dev/ttyUSB2", 2), ("/dev/ttyUSB3", 2)]
    );
}

#[test]
fn test_ids_are_stable_across_scans() {
    let backend = MockBackend::new();
    backend.attach(esp32_board("/dev/ttyUSB0"));
    backend.attach(ch340_board("/dev/ttyUSB1"));
    let registry = registry(&backend);

    let ids = |devices: Vec<DeviceDescriptor>| -> Vec<(String, u16, u16)> {
        devices
            .into_iter()
            .map(|d| (d.name, d.vendor_id, d.product_id))
            .collect()
    };
    let first = ids(registry.list_devices().unwrap());
    let second = ids(registry.list_devices().unwrap());
    assert_eq!(first, second);
}

#[test]
fn test_session_lists_through_its_registry() {
    let backend = MockBackend::new();
    backend.attach(ch340_board("COM7"));
    let session = TransportSession::new(Arc::new(backend), Arc::new(ActivityLog::default()));

    let devices = session.list_devices().unwrap();
    assert_eq!(devices[0].name, "COM7");
    assert_eq!(devices[0].label(), "COM7");
}

#[tokio::test]
async fn test_connect_reports_discovery_failure() {
    let backend = MockBackend::new();
    backend.attach(esp32_board("/dev/ttyUSB0"));
    backend.set_discovery_mode(DiscoveryMode::Denied);
    let session = TransportSession::new(
        Arc::new(backend.clone()),
        Arc::new(ActivityLog::default()),
    );

    let err = session.connect("/dev/ttyUSB0", 115_200).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::Discovery(DiscoveryError::PermissionDenied(_)))
    ));
    assert_eq!(backend.open_count(), 0);
}
