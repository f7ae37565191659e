//! MQTT 3.1.1 client for the device agent
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection state, reconnect policy and option building
//! - [`message_handler`] - Event routing, topic filters and subscription dispatch
//! - [`health_monitor`] - Reconnection decisions and state transitions
//! - [`client`] - The rumqttc-backed client and its event loop supervisor
//!
//! # Usage
//!
//! ```rust,no_run
//! use device_agent::config::DeviceConfig;
//! use device_agent::transport::mqtt::MqttClient;
//! use device_agent::transport::QoS;
//!
//! # tokio_test::block_on(async {
//! let config = DeviceConfig::from_toml_str(r#"
//!     [board_config]
//!     thing_id = "dev42"
//!     thing_key = "secret"
//!     token = "token"
//!     control_channel_id = "ctl1"
//!     export_channel_id = "exp1"
//! "#)?;
//!
//! let mut client = MqttClient::new(&config, "tcp://localhost:1883", None)?;
//! client.connect().await?;
//! client
//!     .publish("channels/exp1/messages/services/dev42/sensorTest", QoS::AtLeastOnce, false, b"[]".to_vec())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, qos_from_level, BrokerAddress, ConnectionState, MqttError,
    ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{topic_matches, EventRoute, MessageDispatcher, MessageHandler};
