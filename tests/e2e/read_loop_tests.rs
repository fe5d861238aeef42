//! Read loop E2E tests.
//!
//! Tests cover:
//! - Delivery of received bytes in order
//! - Silent timeouts and reported channel errors
//! - No reads after stop
//! - Teardown while a read is pending

use crate::common::{wait_for, TestHarness, DEVICE, FAST_READ_TIMEOUT};
use pretty_assertions::assert_eq;
use serial_transport::activity::ActivityKind;
use serial_transport::port::MockOp;
use serial_transport::{ErrorKind, ReadLoop, SessionPhase};
use std::time::Duration;

#[tokio::test]
async fn test_bytes_arrive_in_order() {
    let harness = TestHarness::connected().await;
    let read_loop = harness.read_loop();
    read_loop.start().await.unwrap();

    harness.port.enqueue_read(b"rst:0x1 (POWERON_RESET)\r\n");
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.port.enqueue_read(b"boot:0x13 (SPI_FAST_FLASH_BOOT)\r\n");

    let expected = b"rst:0x1 (POWERON_RESET)\r\nboot:0x13 (SPI_FAST_FLASH_BOOT)\r\n";
    assert!(wait_for(Duration::from_secs(2), || harness.received_bytes().len() == expected.len()).await);
    read_loop.stop().await;

    assert_eq!(harness.received_bytes(), expected.to_vec());
    assert_eq!(
        harness.session.status().bytes_read_total,
        expected.len() as u64
    );
}

#[tokio::test]
async fn test_timeouts_are_silent() {
    let harness = TestHarness::connected().await;
    let read_loop = harness.read_loop();
    read_loop.start().await.unwrap();

    // Several read timeouts elapse with nothing on the wire.
    tokio::time::sleep(FAST_READ_TIMEOUT * 4).await;
    read_loop.stop().await;

    assert!(harness.port.read_count() >= 2);
    assert!(harness.error_messages().is_empty());
    assert!(harness.log.of_kind(ActivityKind::Receive).is_empty());
}

#[tokio::test]
async fn test_channel_error_is_reported_and_loop_continues() {
    let harness = TestHarness::connected().await;
    harness.port.fail_next(MockOp::Read, "parity error");
    let read_loop = harness.read_loop();
    read_loop.start().await.unwrap();

    assert!(wait_for(Duration::from_secs(2), || !harness.error_messages().is_empty()).await);
    assert!(harness.error_messages()[0].contains("parity error"));

    harness.port.enqueue_read(b"still alive");
    assert!(wait_for(Duration::from_secs(2), || harness.received_bytes() == b"still alive").await);
    assert!(read_loop.is_running());
    read_loop.stop().await;
}

#[tokio::test]
async fn test_no_read_after_stop() {
    let harness = TestHarness::connected().await;
    let read_loop = harness.read_loop();
    read_loop.start().await.unwrap();
    tokio::time::sleep(FAST_READ_TIMEOUT * 2).await;

    assert!(read_loop.stop().await);
    let count_at_stop = harness.port.read_count();
    tokio::time::sleep(FAST_READ_TIMEOUT * 2).await;

    assert_eq!(harness.port.read_count(), count_at_stop);
    assert!(!read_loop.is_running());
    assert_eq!(harness.session.phase(), SessionPhase::Open);
}

#[tokio::test]
async fn test_loop_can_restart_after_stop() {
    let harness = TestHarness::connected().await;
    let read_loop = harness.read_loop();

    read_loop.start().await.unwrap();
    read_loop.stop().await;
    assert!(read_loop.start().await.unwrap());

    harness.port.enqueue_read(b"again");
    assert!(wait_for(Duration::from_secs(2), || harness.received_bytes() == b"again").await);
    read_loop.stop().await;
}

#[tokio::test]
async fn test_disconnect_mid_timeout_does_not_deadlock() {
    let harness = TestHarness::new();
    harness.session.connect(DEVICE, 115_200).await.unwrap();
    let read_loop = ReadLoop::new(harness.session.clone()).with_read_timeout(Duration::from_millis(500));
    read_loop.start().await.unwrap();

    // Let the loop block inside a long read before tearing down.
    assert!(wait_for(Duration::from_secs(1), || harness.port.read_count() >= 1).await);
    tokio::time::timeout(Duration::from_secs(5), harness.session.disconnect())
        .await
        .expect("disconnect must not deadlock");

    assert!(!read_loop.is_running());
    assert!(harness.port.is_closed());
    let reads = harness.port.read_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.port.read_count(), reads);
}

#[tokio::test]
async fn test_loop_exits_when_session_closes() {
    let harness = TestHarness::connected().await;
    let read_loop = harness.read_loop();
    read_loop.start().await.unwrap();

    harness.session.disconnect().await;
    let err = read_loop.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    assert!(!read_loop.stop().await);
}
