//! Transport layer for device communication
//!
//! This module provides the transport abstraction the publisher, subscriber
//! and orchestrator are written against, and the MQTT implementation.

use std::sync::Arc;

pub use rumqttc::QoS;

pub mod mqtt;

/// Callback invoked once per inbound message matching a subscription
pub type MessageHandlerFn = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Transport trait for device communication
///
/// Implementations own the broker session. Publish and subscribe take `&self`
/// so one instance can be shared through an `Arc` by every activity.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker; returns once the session is usable
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish a payload and wait until the transport has accepted it
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error>;

    /// Register `handler` for every message matching `topic_filter`
    async fn subscribe(
        &self,
        topic_filter: &str,
        qos: QoS,
        handler: MessageHandlerFn,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;
}
