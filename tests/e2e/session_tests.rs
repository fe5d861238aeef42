//! Transport session E2E tests.
//!
//! Tests cover:
//! - Connection failures and their kinds
//! - The one-session-at-a-time rule
//! - Read timeouts as an explicit signal
//! - Baud rate changes
//! - Channel-level serialization of concurrent callers

use crate::common::{ch340_board, esp32_board, TestHarness, DEVICE};
use pretty_assertions::assert_eq;
use serial_transport::activity::ActivityKind;
use serial_transport::port::{ChannelCall, MockOp};
use serial_transport::{
    ActivityLog, ConnectionError, ErrorKind, SessionOptions, SessionPhase, TransportError,
    TransportSession,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_second_connect_leaves_first_session_untouched() {
    let harness = TestHarness::connected().await;

    let err = harness.session.connect(DEVICE, 9600).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::AlreadyConnected(ref d)) if d == DEVICE
    ));

    let status = harness.session.status();
    assert_eq!(status.phase, SessionPhase::Open);
    assert_eq!(status.baud_rate, Some(115_200));
    assert_eq!(harness.backend.open_count(), 1);
}

#[tokio::test]
async fn test_unplugged_device_is_not_found() {
    let harness = TestHarness::new();
    harness.backend.detach(DEVICE);

    let err = harness.session.connect(DEVICE, 115_200).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::DeviceNotFound(_))
    ));
    assert_eq!(harness.session.phase(), SessionPhase::Closed);
    assert_eq!(harness.error_messages().len(), 1);
}

#[tokio::test]
async fn test_permission_denied() {
    let harness = TestHarness::new();
    harness.backend.deny_open(DEVICE);

    let err = harness.session.connect(DEVICE, 115_200).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::PermissionDenied(_))
    ));
    assert_eq!(harness.session.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn test_device_bound_elsewhere_is_busy() {
    let harness = TestHarness::connected().await;
    let other = TransportSession::new(
        Arc::new(harness.backend.clone()),
        Arc::new(ActivityLog::default()),
    );

    let err = other.connect(DEVICE, 115_200).await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::Busy(_))
    ));

    harness.session.disconnect().await;
    other.connect(DEVICE, 115_200).await.unwrap();
}

#[tokio::test]
async fn test_custom_initial_lines() {
    let harness = TestHarness::with_options(SessionOptions {
        initial_dtr: false,
        initial_rts: true,
        ..SessionOptions::default()
    });
    harness.session.connect(DEVICE, 74_880).await.unwrap();

    let lines: Vec<_> = harness
        .port
        .control_calls()
        .into_iter()
        .map(|c| c.call)
        .collect();
    assert_eq!(lines, [ChannelCall::Dtr(false), ChannelCall::Rts(true)]);
    let status = harness.session.status();
    assert!(!status.dtr);
    assert!(status.rts);
}

#[tokio::test]
async fn test_read_timeout_is_explicit() {
    let harness = TestHarness::connected().await;

    let started = Instant::now();
    let err = harness
        .session
        .raw_read(Duration::from_millis(80))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert!(err.is_timeout());
    assert!(matches!(err, TransportError::ReadTimeout(d) if d == Duration::from_millis(80)));
}

#[tokio::test]
async fn test_read_respects_chunk_size() {
    let harness = TestHarness::with_options(SessionOptions {
        read_chunk: 4,
        ..SessionOptions::default()
    });
    harness.session.connect(DEVICE, 115_200).await.unwrap();
    harness.port.enqueue_read(b"abcdefghij");

    let first = harness.session.raw_read(Duration::from_millis(50)).await.unwrap();
    let second = harness.session.raw_read(Duration::from_millis(50)).await.unwrap();
    assert_eq!(first, b"abcd");
    assert_eq!(second, b"efgh");
    assert_eq!(harness.port.available_bytes(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_read_does_not_hold_off_writes() {
    let harness = TestHarness::connected().await;
    let reader = harness.session.clone();
    let pending = tokio::spawn(async move { reader.raw_read(Duration::from_millis(1000)).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = Instant::now();
    harness.session.write(b"AT\r\n").await.unwrap();
    harness.session.set_dtr(false).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));

    harness.port.enqueue_read(b"OK");
    let data = pending.await.unwrap().unwrap();
    assert_eq!(data, b"OK");
    assert_eq!(harness.port.max_concurrent_calls(), 1);
}

#[tokio::test]
async fn test_channel_failure_is_not_a_timeout() {
    let harness = TestHarness::connected().await;
    harness.port.fail_next(MockOp::Read, "framing error");

    let err = harness
        .session
        .raw_read(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Channel);
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn test_write_emits_transmit_event() {
    let harness = TestHarness::connected().await;
    harness.session.write(&[0x48, 0x49]).await.unwrap();

    assert_eq!(harness.port.written_bytes(), [0x48, 0x49]);
    let transmit = harness.log.of_kind(ActivityKind::Transmit);
    assert_eq!(transmit.len(), 1);
    assert_eq!(transmit[0].payload.as_deref(), Some(&[0x48, 0x49][..]));
}

#[tokio::test]
async fn test_write_failure_is_channel_error() {
    let harness = TestHarness::connected().await;
    harness.port.fail_next(MockOp::Write, "device gone");

    let err = harness.session.write(b"AT\r\n").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Channel);
    assert_eq!(harness.session.status().bytes_written_total, 0);
}

#[tokio::test]
async fn test_zero_baud_keeps_current_rate() {
    let harness = TestHarness::connected().await;

    let err = harness.session.set_baud_rate(0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(harness.session.status().baud_rate, Some(115_200));
    assert!(harness.port.calls().is_empty());
}

#[tokio::test]
async fn test_baud_change_reaches_channel() {
    let harness = TestHarness::connected().await;
    harness.session.set_baud_rate(460_800).await.unwrap();

    assert_eq!(
        harness.port.calls()[0].call,
        ChannelCall::SetBaudRate(460_800)
    );
    assert_eq!(harness.session.status().baud_rate, Some(460_800));
}

#[tokio::test]
async fn test_disconnect_on_closed_session_is_noop() {
    let harness = TestHarness::new();
    harness.session.disconnect().await;
    harness.session.disconnect().await;

    assert_eq!(harness.session.phase(), SessionPhase::Closed);
    assert!(harness.log.is_empty());
}

#[tokio::test]
async fn test_unplug_while_open_surfaces_channel_errors() {
    let harness = TestHarness::connected().await;
    harness.backend.detach(DEVICE);

    let err = harness.session.write(b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Channel);
    assert_eq!(harness.session.phase(), SessionPhase::Open);

    harness.session.disconnect().await;
    assert_eq!(harness.session.phase(), SessionPhase::Closed);
    assert!(!harness.backend.is_claimed(DEVICE));
}

#[tokio::test]
async fn test_reconnect_after_replug() {
    let harness = TestHarness::connected().await;
    harness.session.disconnect().await;

    harness.backend.detach(DEVICE);
    let replugged = harness.backend.attach(esp32_board(DEVICE));
    harness.session.connect(DEVICE, 115_200).await.unwrap();

    replugged.enqueue_read(b"ready");
    let data = harness
        .session
        .raw_read(Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(data, b"ready");
}

#[tokio::test]
async fn test_listed_descriptor_refuses_other_hardware_at_same_path() {
    let harness = TestHarness::new();
    let listed = harness.session.list_devices().unwrap().remove(0);

    harness.backend.detach(DEVICE);
    let impostor = harness.backend.attach(ch340_board(DEVICE));

    let err = harness
        .session
        .connect_descriptor(&listed, 115_200)
        .await
        .unwrap_err();
    match err {
        TransportError::Connection(ConnectionError::DeviceChanged {
            device,
            expected,
            found,
        }) => {
            assert_eq!(device, DEVICE);
            assert_eq!(expected, "10C4:EA60/0001");
            assert_eq!(found, "1A86:7523");
        }
        other => panic!("expected DeviceChanged, got {other:?}"),
    }
    assert_eq!(harness.session.phase(), SessionPhase::Closed);
    assert_eq!(harness.backend.open_count(), 0);
    assert!(impostor.calls().is_empty());
}

#[tokio::test]
async fn test_listed_descriptor_connects_and_detects_detach() {
    let harness = TestHarness::new();
    let listed = harness.session.list_devices().unwrap().remove(0);

    harness
        .session
        .connect_descriptor(&listed, 115_200)
        .await
        .unwrap();
    assert_eq!(harness.session.status().device.as_deref(), Some(DEVICE));
    harness.session.disconnect().await;

    harness.backend.detach(DEVICE);
    let err = harness
        .session
        .connect_descriptor(&listed, 115_200)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(ConnectionError::DeviceNotFound(_))
    ));

    // The same board plugged back in is accepted again.
    harness.backend.attach(esp32_board(DEVICE));
    harness
        .session
        .connect_descriptor(&listed, 115_200)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_write_and_dtr_never_interleave() {
    let harness = TestHarness::connected().await;
    harness.port.set_max_write_chunk(2);
    harness.port.set_op_delay(Duration::from_millis(1));

    let writer = {
        let session = harness.session.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                session.write(b"0123456789").await.unwrap();
            }
        })
    };
    let toggler = {
        let session = harness.session.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                session.set_dtr(i % 2 == 0).await.unwrap();
            }
        })
    };
    writer.await.unwrap();
    toggler.await.unwrap();

    assert_eq!(harness.port.max_concurrent_calls(), 1);

    // Each write is five chunk writes followed by a flush; nothing may
    // land between them.
    let calls: Vec<_> = harness.port.calls().into_iter().map(|c| c.call).collect();
    let mut in_write = false;
    for call in &calls {
        match call {
            ChannelCall::Write(_) => in_write = true,
            ChannelCall::Flush => in_write = false,
            ChannelCall::Dtr(_) => assert!(!in_write, "DTR interleaved with a write: {calls:?}"),
            _ => {}
        }
    }
    assert_eq!(harness.port.written_bytes().len(), 100);
    assert_eq!(
        calls.iter().filter(|c| matches!(c, ChannelCall::Dtr(_))).count(),
        10
    );
}
