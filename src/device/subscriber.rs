//! Command subscription for the device

use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::DeviceTopics;
use crate::transport::mqtt::qos_from_level;
use crate::transport::{MessageHandlerFn, QoS, Transport};
use std::sync::Arc;
use tracing::info;

/// Handler that only logs what arrived
pub fn log_command_handler() -> MessageHandlerFn {
    Arc::new(|topic: &str, payload: &[u8]| {
        info!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received command"
        );
    })
}

pub struct CommandSubscriber<T: Transport> {
    transport: Arc<T>,
    topic: String,
    qos: QoS,
    handler: MessageHandlerFn,
}

impl<T: Transport> CommandSubscriber<T> {
    pub fn new(transport: Arc<T>, config: &DeviceConfig) -> Self {
        Self {
            transport,
            topic: DeviceTopics::from_config(config).command,
            qos: qos_from_level(config.mqtt.qos),
            handler: log_command_handler(),
        }
    }

    pub fn with_handler(mut self, handler: MessageHandlerFn) -> Self {
        self.handler = handler;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Register the handler for every message under the command topic
    pub async fn listen(&self) -> DeviceResult<()> {
        self.transport
            .subscribe(&self.topic, self.qos, self.handler.clone())
            .await
            .map_err(|e| DeviceError::subscribe(&self.topic, e))?;

        info!(topic = %self.topic, "Listening for commands");
        Ok(())
    }
}
