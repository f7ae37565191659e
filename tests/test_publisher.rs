//! Periodic activity tests
//!
//! Drives the telemetry and heartbeat publishers with a manual ticker so
//! every tick is explicit, and observes the mock transport.


use device_agent::device::{HeartbeatPublisher, TelemetryPublisher};
use device_agent::protocol::Pack;
use device_agent::sensor::{FixedSource, Measurement, MeasurementSource};
use device_agent::testing::mocks::{ManualTicker, MockTransport};
use device_agent::transport::QoS;
use device_agent::DeviceError;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{test_config, HEARTBEAT_TOPIC, TELEMETRY_TOPIC};
use tokio::sync::watch;

fn voltage_source() -> Arc<dyn MeasurementSource> {
    Arc::new(FixedSource(Measurement::new("voltage", 3.7, "v")))
}

#[tokio::test]
async fn test_telemetry_publishes_once_per_tick() {
    // Arrange
    let transport = Arc::new(MockTransport::connected());
    let publisher = TelemetryPublisher::new(transport.clone(), &test_config(), voltage_source());
    let (ticker, ticks) = ManualTicker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(publisher.run(ticker, shutdown_rx));

    // Act
    for _ in 0..3 {
        ticks.tick();
    }

    // Assert
    assert!(
        transport.wait_for_published(TELEMETRY_TOPIC, 3).await,
        "Three ticks should produce three packs"
    );
    let published = transport.get_published_to(TELEMETRY_TOPIC).await;
    assert_eq!(published.len(), 3);
    for message in &published {
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(!message.retain);
        let pack = Pack::decode(&message.payload).unwrap();
        assert_eq!(pack.len(), 1);
        assert_eq!(pack.records[0].name, "voltage");
    }

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Publisher should stop on shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_telemetry_stops_after_first_failure() {
    // Arrange
    let transport = Arc::new(MockTransport::connected());
    transport.fail_publishes_to(TELEMETRY_TOPIC).await;
    let publisher = TelemetryPublisher::new(transport.clone(), &test_config(), voltage_source());
    let (ticker, ticks) = ManualTicker::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(publisher.run(ticker, shutdown_rx));

    // Act
    ticks.tick();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Publisher should end on its own after a failure")
        .unwrap();

    // Assert
    match result {
        Err(DeviceError::Publish { topic, .. }) => assert_eq!(topic, TELEMETRY_TOPIC),
        other => panic!("Expected a publish error, got {other:?}"),
    }

    // Later ticks have no one to drive
    transport.clear_failures().await;
    ticks.tick();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.get_published_to(TELEMETRY_TOPIC).await.is_empty());
    assert_eq!(transport.get_failed_publishes().await.len(), 1);
}

#[tokio::test]
async fn test_heartbeat_survives_publish_failure() {
    // Arrange
    let transport = Arc::new(MockTransport::connected());
    transport.fail_publishes_to(HEARTBEAT_TOPIC).await;
    let heartbeat = HeartbeatPublisher::new(transport.clone(), &test_config());
    let (ticker, ticks) = ManualTicker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(heartbeat.run(ticker, shutdown_rx));

    // Act: one failing tick, then a healthy one
    ticks.tick();
    assert!(transport.wait_for_failed(HEARTBEAT_TOPIC, 1).await);
    transport.clear_failures().await;
    ticks.tick();

    // Assert
    assert!(
        transport.wait_for_published(HEARTBEAT_TOPIC, 1).await,
        "Heartbeat should keep ticking after a failure"
    );
    let published = transport.get_published_to(HEARTBEAT_TOPIC).await;
    assert!(published[0].payload.is_empty());
    assert!(!handle.is_finished());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Heartbeat should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_idle_activity_stops_on_shutdown() {
    let transport = Arc::new(MockTransport::connected());
    let heartbeat = HeartbeatPublisher::new(transport.clone(), &test_config());
    let (ticker, _ticks) = ManualTicker::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(heartbeat.run(ticker, shutdown_rx));

    shutdown_tx.send(true).unwrap();

    assert!(
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .is_ok(),
        "An activity waiting for its next tick should still stop promptly"
    );
    assert!(transport.get_published_messages().await.is_empty());
}

#[tokio::test]
async fn test_retain_flag_comes_from_config() {
    let config = device_agent::config::DeviceConfig::from_toml_str(&format!(
        "{}\n",
        test_helpers::BASE_TOML.replace("qos = 1", "qos = 0\nretain = true")
    ))
    .unwrap();
    let transport = Arc::new(MockTransport::connected());
    let publisher = TelemetryPublisher::new(transport.clone(), &config, voltage_source());

    publisher.publish_once().await.unwrap();

    let published = transport.get_published_messages().await;
    assert!(published[0].retain);
    assert_eq!(published[0].qos, QoS::AtMostOnce);
}
