mod common;

use std::sync::Arc;

use common::{digispark, fast_settings, harness, strings, unknown_device};
use serial_link::device::{ChipFamily, DriverProfile, DriverRegistry};
use serial_link::serial::mock::MockTransport;
use serial_link::serial::{LineParameters, PortHandle};
use serial_link::status::RecordingStatusSink;
use serial_link::{SerialSession, SessionError, SessionState};

#[tokio::test]
async fn open_connects_registered_cdc_device() {
    let h = harness(vec![digispark()]);

    h.session.open().await.expect("open");

    assert_eq!(h.status.messages(), strings(&["opening", "connected"]));
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.session.generation(), Some(1));
    assert_eq!(h.session.connected_device(), Some(digispark()));

    let port = h.transport.last_port().expect("port opened");
    assert_eq!(port.line_parameters(), Some(LineParameters::FIXED));
    // Port 0 is always the one opened
    assert!(port.name().ends_with("#0"));

    h.session.close().await;
}

#[tokio::test]
async fn open_without_driver_reports_and_stays_closed() {
    let h = harness(vec![unknown_device()]);

    let err = h.session.open().await.unwrap_err();
    assert!(matches!(err, SessionError::NoDriver));
    assert_eq!(
        h.status.messages(),
        strings(&["connection failed: no driver for device"])
    );
    assert_eq!(h.session.state(), SessionState::Closed);
    assert!(h.transport.ports().is_empty());
}

#[tokio::test]
async fn open_with_no_devices_reports_no_driver() {
    let h = harness(Vec::new());
    assert!(matches!(h.session.open().await, Err(SessionError::NoDriver)));
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn port_shortage_is_reported() {
    let transport = Arc::new(MockTransport::with_devices(vec![digispark()]));
    let status = Arc::new(RecordingStatusSink::new());
    let mut registry = DriverRegistry::new();
    registry.register(
        0x16d0,
        0x087e,
        DriverProfile::new(0x16d0, 0x087e, ChipFamily::CdcAcm).with_ports(0),
    );
    let (session, _events) = SerialSession::builder(transport.clone(), registry)
        .status_sink(status.clone())
        .settings(fast_settings())
        .build();

    let err = session.open().await.unwrap_err();
    assert!(matches!(err, SessionError::PortShortage { .. }));
    assert_eq!(
        status.messages(),
        strings(&["connection failed: not enough ports at device"])
    );
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn permission_denied_is_reported() {
    let h = harness(vec![digispark()]);
    h.transport.deny_permission(&digispark().id);

    let err = h.session.open().await.unwrap_err();
    assert!(matches!(err, SessionError::PermissionDenied(_)));
    assert_eq!(h.status.messages(), strings(&["opening", "permission denied"]));
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn unavailable_device_reports_open_failed() {
    let h = harness(vec![digispark()]);
    h.transport.make_unavailable(&digispark().id);

    assert!(matches!(h.session.open().await, Err(SessionError::OpenIo(_))));
    assert_eq!(h.status.messages(), strings(&["opening", "open failed"]));
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn broken_open_reports_cause() {
    let h = harness(vec![digispark()]);
    h.transport.fail_open(&digispark().id, "device busy");

    assert!(h.session.open().await.is_err());
    let messages = h.status.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], "opening");
    assert!(messages[1].starts_with("connection failed: "), "{}", messages[1]);
    assert!(messages[1].contains("device busy"), "{}", messages[1]);
}

#[tokio::test]
async fn failed_configure_closes_the_port() {
    let config = serial_link::serial::mock::MockPortConfig {
        line_parameter_error: Some("baud rate rejected".into()),
        ..Default::default()
    };
    let h = common::harness_with(vec![digispark()], config, Arc::new(|| b"tick".to_vec()));

    assert!(matches!(h.session.open().await, Err(SessionError::OpenIo(_))));
    assert_eq!(h.session.state(), SessionState::Closed);

    let port = h.transport.last_port().expect("port opened");
    assert_eq!(port.close_calls(), 1);
    assert_eq!(port.write_calls(), 0);
    assert!(h.status.messages()[1].starts_with("connection failed: "));
}

#[tokio::test]
async fn second_open_is_rejected() {
    let h = harness(vec![digispark()]);
    h.session.open().await.expect("open");

    assert!(matches!(h.session.open().await, Err(SessionError::AlreadyOpen)));
    assert_eq!(h.transport.ports().len(), 1);
    assert_eq!(h.session.state(), SessionState::Connected);

    h.session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_yield_one_session() {
    let h = harness(vec![digispark()]);

    let a = tokio::spawn({
        let session = Arc::clone(&h.session);
        async move { session.open().await }
    });
    let b = tokio::spawn({
        let session = Arc::clone(&h.session);
        async move { session.open().await }
    });
    let results = [a.await.expect("join"), b.await.expect("join")];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(SessionError::AlreadyOpen)))
            .count(),
        1
    );
    assert_eq!(h.transport.ports().len(), 1);

    h.session.close().await;
}

#[tokio::test]
async fn close_when_closed_is_a_no_op() {
    let h = harness(vec![digispark()]);

    h.session.close().await;
    assert_eq!(h.session.state(), SessionState::Closed);
    assert!(h.status.messages().is_empty());
}

#[tokio::test]
async fn close_reports_and_closes_port_once() {
    let h = harness(vec![digispark()]);
    h.session.open().await.expect("open");

    h.session.close().await;
    h.session.close().await;

    assert_eq!(
        h.status.messages(),
        strings(&["opening", "connected", "disconnecting", "disconnected"])
    );
    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(h.session.generation(), None);

    let port = h.transport.last_port().expect("port opened");
    assert!(port.is_closed());
    assert_eq!(port.close_calls(), 1);
}

#[tokio::test]
async fn reopen_starts_a_new_generation() {
    let h = harness(vec![digispark()]);

    h.session.open().await.expect("first open");
    h.session.close().await;
    h.session.open().await.expect("second open");

    assert_eq!(h.session.generation(), Some(2));
    assert_eq!(h.transport.ports().len(), 2);
    assert!(h.transport.ports()[0].is_closed());
    assert!(!h.transport.ports()[1].is_closed());

    h.session.close().await;
}

#[tokio::test]
async fn close_generation_ignores_stale_generation() {
    let h = harness(vec![digispark()]);
    h.session.open().await.expect("open");

    assert!(!h.session.close_generation(42).await);
    assert_eq!(h.session.state(), SessionState::Connected);

    assert!(h.session.close_generation(1).await);
    assert_eq!(h.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn write_requires_a_connection() {
    let h = harness(vec![digispark()]);
    assert!(matches!(
        h.session.write(b"hello").await,
        Err(SessionError::NotConnected)
    ));

    h.session.open().await.expect("open");
    assert_eq!(h.session.write(b"hello").await.expect("write"), 5);

    let port = h.transport.last_port().expect("port opened");
    assert!(port.written().iter().any(|chunk| chunk == b"hello"));

    h.session.close().await;
    assert!(matches!(
        h.session.write(b"hello").await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn close_error_is_logged_not_propagated() {
    let config = serial_link::serial::mock::MockPortConfig {
        close_error: Some("close failed".into()),
        ..Default::default()
    };
    let h = common::harness_with(vec![digispark()], config, Arc::new(|| b"tick".to_vec()));
    h.session.open().await.expect("open");

    h.session.close().await;

    assert_eq!(h.session.state(), SessionState::Closed);
    assert_eq!(
        h.status.messages(),
        strings(&["opening", "connected", "disconnecting", "disconnected"])
    );
    let port = h.transport.last_port().expect("port opened");
    assert_eq!(port.close_calls(), 1);

    // The session can be opened again afterwards
    h.session.open().await.expect("reopen");
    h.session.close().await;
}
