//! Device service lifecycle tests
//!
//! Tests the full run of a device against the mock transport:
//! - Startup sequence (connect, subscribe, spawn activities)
//! - Termination by signal, telemetry failure and lost connection
//! - Resource cleanup on shutdown


use device_agent::device::{DeviceService, ServiceState, TerminationReason};
use device_agent::protocol::Pack;
use device_agent::sensor::{FixedSource, Measurement};
use device_agent::testing::mocks::{ManualTicker, MockTransport, TickHandle};
use device_agent::transport::MessageHandlerFn;
use device_agent::DeviceError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{test_config, COMMAND_FILTER, HEARTBEAT_TOPIC, TELEMETRY_TOPIC};

/// A running service plus the handles a test needs to drive it
struct RunningDevice {
    service: DeviceService<MockTransport>,
    transport: MockTransport,
    telemetry: TickHandle,
    heartbeat: TickHandle,
}

async fn start_device(transport: MockTransport) -> RunningDevice {
    let observer = transport.clone();
    let mut service = DeviceService::new(test_config(), transport).with_source(Arc::new(
        FixedSource(Measurement::new("voltage", 3.7, "v")),
    ));
    service.connect().await.expect("Mock connect should succeed");

    let (telemetry_ticker, telemetry) = ManualTicker::new();
    let (heartbeat_ticker, heartbeat) = ManualTicker::new();
    service
        .start_with_tickers(telemetry_ticker, heartbeat_ticker)
        .await
        .expect("Start should succeed");

    RunningDevice {
        service,
        transport: observer,
        telemetry,
        heartbeat,
    }
}

#[tokio::test]
async fn test_startup_subscribes_to_command_filter() {
    let mut device = start_device(MockTransport::new()).await;

    assert_eq!(device.service.state(), ServiceState::Running);
    assert_eq!(
        device.transport.subscription_filters().await,
        vec![COMMAND_FILTER.to_string()]
    );

    device.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_device_publishes_expected_reading_then_stops_on_signal() {
    // Arrange
    let mut device = start_device(MockTransport::new()).await;

    // Act: one telemetry tick, one heartbeat tick
    device.telemetry.tick();
    device.heartbeat.tick();
    assert!(device.transport.wait_for_published(TELEMETRY_TOPIC, 1).await);
    assert!(device.transport.wait_for_published(HEARTBEAT_TOPIC, 1).await);

    let reason = device
        .service
        .wait_for_termination(async {})
        .await
        .unwrap();
    device.service.shutdown().await.unwrap();

    // Assert: reading content
    let telemetry = device.transport.get_published_to(TELEMETRY_TOPIC).await;
    let pack = Pack::decode(&telemetry[0].payload).unwrap();
    let record = &pack.records[0];
    assert_eq!(record.base_name, "sensorTest");
    assert_eq!(record.name, "voltage");
    assert_eq!(record.unit, "v");
    assert_eq!(record.value, Some(3.7));

    // Assert: clean termination
    assert_eq!(reason, TerminationReason::Signal);
    assert!(!reason.is_failure());
    assert_eq!(device.service.state(), ServiceState::Terminated);
    assert_eq!(device.transport.disconnect_count(), 1);

    // Nothing is published once the service stopped
    device.telemetry.tick();
    device.heartbeat.tick();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(device.transport.get_published_messages().await.len(), 2);
}

#[tokio::test]
async fn test_signal_while_idle_publishes_nothing() {
    let mut device = start_device(MockTransport::new()).await;

    let reason = device
        .service
        .wait_for_termination(tokio::time::sleep(Duration::from_millis(20)))
        .await
        .unwrap();
    device.service.shutdown().await.unwrap();

    assert_eq!(reason, TerminationReason::Signal);
    assert!(device.transport.get_published_messages().await.is_empty());
}

#[tokio::test]
async fn test_no_publishes_once_termination_is_reported() {
    // Arrange
    let mut device = start_device(MockTransport::new()).await;

    // Act: ticks arrive after the termination reason was returned, before shutdown
    let reason = device
        .service
        .wait_for_termination(async {})
        .await
        .unwrap();
    device.telemetry.tick();
    device.heartbeat.tick();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Assert
    assert_eq!(reason, TerminationReason::Signal);
    assert_eq!(device.service.state(), ServiceState::Terminating);
    assert!(
        device.transport.get_published_messages().await.is_empty(),
        "Activities must be stopped when termination is reported"
    );

    device.service.shutdown().await.unwrap();
    assert_eq!(device.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_telemetry_failure_terminates_service() {
    // Arrange
    let transport = MockTransport::new();
    transport.fail_publishes_to(TELEMETRY_TOPIC).await;
    let mut device = start_device(transport).await;

    // Act
    device.telemetry.tick();
    let reason = tokio::time::timeout(
        Duration::from_secs(2),
        device.service.wait_for_termination(std::future::pending()),
    )
    .await
    .expect("Telemetry failure should end the service")
    .unwrap();
    device.service.shutdown().await.unwrap();

    // Assert
    match &reason {
        TerminationReason::TelemetryFailed(detail) => {
            assert!(detail.contains(TELEMETRY_TOPIC), "Detail was: {detail}")
        }
        other => panic!("Expected TelemetryFailed, got {other:?}"),
    }
    assert!(reason.is_failure());
    assert!(device.transport.get_published_to(TELEMETRY_TOPIC).await.is_empty());
    assert_eq!(device.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_heartbeat_failure_does_not_terminate_service() {
    let transport = MockTransport::new();
    transport.fail_publishes_to(HEARTBEAT_TOPIC).await;
    let mut device = start_device(transport).await;

    device.heartbeat.tick();
    assert!(device.transport.wait_for_failed(HEARTBEAT_TOPIC, 1).await);
    device.telemetry.tick();
    assert!(device.transport.wait_for_published(TELEMETRY_TOPIC, 1).await);

    let reason = device
        .service
        .wait_for_termination(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();
    device.service.shutdown().await.unwrap();

    assert_eq!(reason, TerminationReason::Signal);
}

#[tokio::test]
async fn test_permanent_disconnect_terminates_service() {
    let mut device = start_device(MockTransport::new()).await;

    device.transport.set_permanently_disconnected();
    let reason = tokio::time::timeout(
        Duration::from_secs(2),
        device.service.wait_for_termination(std::future::pending()),
    )
    .await
    .expect("Lost connection should end the service")
    .unwrap();
    device.service.shutdown().await.unwrap();

    match reason {
        TerminationReason::ConnectionLost(detail) => {
            assert!(detail.contains("Mock connection lost"), "Detail was: {detail}")
        }
        other => panic!("Expected ConnectionLost, got {other:?}"),
    }
    assert_eq!(device.service.state(), ServiceState::Terminated);
}

#[tokio::test]
async fn test_commands_reach_configured_handler() {
    // Arrange
    let received: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler: MessageHandlerFn = Arc::new(move |topic: &str, payload: &[u8]| {
        sink.lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
    });

    let transport = MockTransport::new();
    let observer = transport.clone();
    let mut service = DeviceService::new(test_config(), transport).with_command_handler(handler);
    service.connect().await.unwrap();
    let (telemetry, _t) = ManualTicker::new();
    let (heartbeat, _h) = ManualTicker::new();
    service.start_with_tickers(telemetry, heartbeat).await.unwrap();

    // Act
    let delivered = observer
        .deliver("channels/ctl1/messages/services/dev42/reboot", b"now")
        .await;
    let ignored = observer
        .deliver("channels/ctl1/messages/services/dev7/reboot", b"now")
        .await;
    service.shutdown().await.unwrap();

    // Assert
    assert_eq!(delivered, 1);
    assert_eq!(ignored, 0);
    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![(
            "channels/ctl1/messages/services/dev42/reboot".to_string(),
            b"now".to_vec()
        )]
    );
}

#[tokio::test]
async fn test_wait_before_start_is_rejected() {
    let mut service = DeviceService::new(test_config(), MockTransport::new());
    service.connect().await.unwrap();

    let result = service.wait_for_termination(async {}).await;

    assert!(matches!(result, Err(DeviceError::InvalidState(_))));
    assert_eq!(service.state(), ServiceState::Connected);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let mut service = DeviceService::new(test_config(), MockTransport::new());
    service.connect().await.unwrap();

    assert!(matches!(
        service.connect().await,
        Err(DeviceError::InvalidState(_))
    ));
}
