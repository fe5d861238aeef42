//! Tests requiring actual serial hardware.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0          # or COM3 on Windows
//! export TEST_BAUD=115200                # optional, default: 115200
//! cargo test --features hardware-tests -- --ignored
//! ```
//!
//! # Hardware Requirements
//!
//! A USB-serial dev board with the usual DTR/RTS auto-reset circuit (most
//! ESP32 and ESP8266 boards). Boards print a ROM banner after reset.

use super::utils::{skip_without_hardware, system_session};
use serial_transport::activity::ActivityKind;
use serial_transport::{ControlSequencer, ReadLoop, SessionPhase};
use std::time::Duration;

#[test]
#[ignore] // Run with --ignored flag
fn test_discovery_lists_test_port() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let (session, _log) = system_session();

    let devices = session.list_devices().expect("discovery supported");
    for device in &devices {
        println!("  {device} ports={}", device.port_count);
    }
    assert!(
        devices.iter().any(|d| d.name == config.port_name),
        "{} not among discovered USB devices",
        config.port_name
    );
}

#[tokio::test]
#[ignore]
async fn test_connect_and_disconnect() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let (session, _log) = system_session();

    session
        .connect(&config.port_name, config.baud_rate)
        .await
        .expect("open test port");
    let status = session.status();
    assert_eq!(status.phase, SessionPhase::Open);
    assert!(status.dtr && status.rts);

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.phase(), SessionPhase::Closed);
}

#[tokio::test]
#[ignore]
async fn test_reset_prints_boot_banner() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let (session, log) = system_session();
    session
        .connect(&config.port_name, config.baud_rate)
        .await
        .expect("open test port");

    let read_loop = ReadLoop::new(session.clone()).with_read_timeout(Duration::from_millis(200));
    read_loop.start().await.expect("start read loop");
    ControlSequencer::new(session.clone())
        .reset()
        .await
        .expect("reset sequence");

    tokio::time::sleep(Duration::from_secs(2)).await;
    session.disconnect().await;

    let received: usize = log
        .of_kind(ActivityKind::Receive)
        .iter()
        .filter_map(|e| e.payload.as_ref())
        .map(Vec::len)
        .sum();
    println!("received {received} bytes after reset");
    assert!(received > 0, "board printed nothing after reset");
}

#[tokio::test]
#[ignore]
async fn test_read_timeout_on_quiet_line() {
    let Some(config) = skip_without_hardware() else {
        return;
    };
    let (session, _log) = system_session();
    session
        .connect(&config.port_name, config.baud_rate)
        .await
        .expect("open test port");

    // Drain whatever the board printed on connect, then expect silence.
    while session.raw_read(Duration::from_millis(300)).await.is_ok() {}
    let err = session
        .raw_read(Duration::from_millis(300))
        .await
        .expect_err("quiet line");
    assert!(err.is_timeout());

    session.disconnect().await;
}
