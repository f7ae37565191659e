//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! reconnection policy and translating device configuration into rumqttc
//! options.

use crate::config::BoardSection;
use crate::tls::TlsMaterial;
use rumqttc::{MqttOptions, QoS, TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Custom backoff pattern in milliseconds (if empty, uses sustained delay)
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted (for unlimited retries)
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,                      // Unlimited retries by default
            backoff_pattern: vec![25, 50, 100, 250], // 25ms, 50ms, 100ms, 250ms pattern
            sustained_delay: 250,                    // Stay at 250ms after pattern exhausted
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt using custom pattern
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscription to {topic} failed: {reason}")]
    SubscriptionFailed { topic: String, reason: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Invalid reconnect configuration: {0}")]
    InvalidReconnectConfig(String),
}

/// Broker location parsed from a URI such as `tcp://host:1883`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Accepts `tcp`, `mqtt`, `ssl`, `tls` and `mqtts` schemes
    pub fn parse(broker_url: &str) -> Result<Self, MqttError> {
        let invalid = || MqttError::InvalidBrokerUrl(broker_url.to_string());
        let url = Url::parse(broker_url).map_err(|_| invalid())?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            _ => return Err(invalid()),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self { host, port, tls })
    }
}

/// Map a validated numeric QoS level onto rumqttc's enum
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Build rumqttc options for the device session
///
/// Client id is the service name, credentials are the thing id and key, and
/// the session is clean so the broker keeps no state between connects. When
/// TLS material is supplied it is always applied, whatever the URI scheme.
pub fn configure_mqtt_options(
    client_id: &str,
    broker_url: &str,
    board: &BoardSection,
    tls: Option<&TlsMaterial>,
) -> Result<MqttOptions, MqttError> {
    let address = BrokerAddress::parse(broker_url)?;

    let mut mqtt_options = MqttOptions::new(client_id, address.host.as_str(), address.port);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_credentials(board.thing_id.as_str(), board.thing_key.as_str());

    match tls {
        Some(material) => {
            let config = TlsConfiguration::Simple {
                ca: material.ca.clone(),
                alpn: None,
                client_auth: Some((material.client_cert.clone(), material.client_key.clone())),
            };
            mqtt_options.set_transport(RumqttcTransport::tls_with_config(config));
        }
        None if address.tls => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        None => {}
    }

    Ok(mqtt_options)
}
