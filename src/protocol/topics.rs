//! Topic construction for device channels
//!
//! Every topic is a pure function of the channel id, the device id and (for
//! telemetry) the sensor sub-topic. Publishers and subscribers must derive
//! topics through these functions only.

use crate::config::DeviceConfig;

const HEARTBEAT_SUBJECT: &str = "heartbeat";
const SERVICE_SUBJECT: &str = "service";

/// Pure topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// `channels/{export}/messages/services/{device}/{subtopic}`
    pub fn telemetry_topic(export_channel_id: &str, device_id: &str, subtopic: &str) -> String {
        format!("channels/{export_channel_id}/messages/services/{device_id}/{subtopic}")
    }

    /// `channels/{control}/messages/heartbeat/{device}/service`
    pub fn heartbeat_topic(control_channel_id: &str, device_id: &str) -> String {
        format!(
            "channels/{control_channel_id}/messages/{HEARTBEAT_SUBJECT}/{device_id}/{SERVICE_SUBJECT}"
        )
    }

    /// `channels/{control}/messages/services/{device}/#`
    pub fn command_topic(control_channel_id: &str, device_id: &str) -> String {
        format!("channels/{control_channel_id}/messages/services/{device_id}/#")
    }
}

/// The three topics a device uses, derived from its configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub telemetry: String,
    pub heartbeat: String,
    pub command: String,
}

impl DeviceTopics {
    pub fn from_config(config: &DeviceConfig) -> Self {
        let board = &config.board_config;
        let device_id = config.device_id();
        Self {
            telemetry: TopicBuilder::telemetry_topic(
                &board.export_channel_id,
                device_id,
                &config.device.sensor_name,
            ),
            heartbeat: TopicBuilder::heartbeat_topic(&board.control_channel_id, device_id),
            command: TopicBuilder::command_topic(&board.control_channel_id, device_id),
        }
    }
}
