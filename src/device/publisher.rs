//! Periodic publishing activities
//!
//! [`TelemetryPublisher`] samples a measurement source and publishes one SenML
//! pack per tick; a failure ends the activity. [`HeartbeatPublisher`] sends an
//! empty liveness message per tick and survives failures.

use super::ticker::Ticker;
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::DeviceTopics;
use crate::sensor::{MeasurementSource, Sensor};
use crate::transport::mqtt::qos_from_level;
use crate::transport::{QoS, Transport};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// True once shutdown was requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) -> bool {
    match shutdown.changed().await {
        Ok(()) => *shutdown.borrow(),
        Err(_) => true,
    }
}

pub struct TelemetryPublisher<T: Transport> {
    transport: Arc<T>,
    sensor: Sensor,
    source: Arc<dyn MeasurementSource>,
    topic: String,
    qos: QoS,
    retain: bool,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(
        transport: Arc<T>,
        config: &DeviceConfig,
        source: Arc<dyn MeasurementSource>,
    ) -> Self {
        Self {
            transport,
            sensor: Sensor::new(config.device.sensor_name.clone()),
            source,
            topic: DeviceTopics::from_config(config).telemetry,
            qos: qos_from_level(config.mqtt.qos),
            retain: config.mqtt.retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sample, encode and publish a single pack
    pub async fn publish_once(&self) -> DeviceResult<()> {
        let measurement = self.source.sample();
        let payload = self.sensor.pack(&measurement).encode()?;

        self.transport
            .publish(&self.topic, self.qos, self.retain, payload)
            .await
            .map_err(|e| DeviceError::publish(&self.topic, e))?;

        debug!(
            topic = %self.topic,
            name = %measurement.name,
            value = measurement.value,
            unit = %measurement.unit,
            "Published telemetry"
        );
        Ok(())
    }

    /// Publish on every tick until shutdown; the first error is returned
    pub async fn run<K: Ticker>(
        self,
        mut ticker: K,
        mut shutdown: watch::Receiver<bool>,
    ) -> DeviceResult<()> {
        info!(topic = %self.topic, "Telemetry publisher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                stop = shutdown_requested(&mut shutdown) => {
                    if stop {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once().await {
                        error!(topic = %self.topic, error = %e, "Telemetry publish failed, stopping");
                        return Err(e);
                    }
                }
            }
        }

        info!("Telemetry publisher stopped");
        Ok(())
    }
}

pub struct HeartbeatPublisher<T: Transport> {
    transport: Arc<T>,
    topic: String,
    qos: QoS,
    retain: bool,
}

impl<T: Transport> HeartbeatPublisher<T> {
    pub fn new(transport: Arc<T>, config: &DeviceConfig) -> Self {
        Self {
            transport,
            topic: DeviceTopics::from_config(config).heartbeat,
            qos: qos_from_level(config.mqtt.qos),
            retain: config.mqtt.retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish_once(&self) -> DeviceResult<()> {
        self.transport
            .publish(&self.topic, self.qos, self.retain, Vec::new())
            .await
            .map_err(|e| DeviceError::publish(&self.topic, e))
    }

    /// Publish on every tick until shutdown; failures are logged and skipped
    pub async fn run<K: Ticker>(self, mut ticker: K, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "Heartbeat publisher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                stop = shutdown_requested(&mut shutdown) => {
                    if stop {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.publish_once().await {
                        Ok(()) => debug!(topic = %self.topic, "Heartbeat published"),
                        Err(e) => {
                            error!(topic = %self.topic, error = %e, "Heartbeat publish failed");
                        }
                    }
                }
            }
        }

        info!("Heartbeat publisher stopped");
    }
}
