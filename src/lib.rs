//! Device agent - Rust Implementation
//!
//! A simulated IoT device that connects to an MQTT broker, periodically
//! publishes SenML-encoded sensor readings on its export channel, sends
//! heartbeats on its control channel and listens for commands addressed to it.
//!
//! # Overview
//!
//! - [`config`] - TOML configuration with validation
//! - [`tls`] - Mutual TLS certificate loading
//! - [`protocol`] - SenML encoding and topic layout
//! - [`transport`] - The `Transport` capability and its MQTT 3.1.1 client
//! - [`device`] - Telemetry, heartbeat and command activities plus the service lifecycle
//! - [`sensor`] - Measurement sources
//!
//! # Quick Start
//!
//! ```rust
//! use device_agent::protocol::{Pack, Record};
//!
//! let pack = Pack::from(Record::build("voltage", 3.7, "v", "sensorTest"));
//! let payload = pack.encode().unwrap();
//!
//! let decoded = Pack::decode(&payload).unwrap();
//! assert_eq!(decoded.records[0].base_name, "sensorTest");
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod testing;
pub mod tls;
pub mod transport;

pub use config::{ConfigError, DeviceConfig};
pub use device::{DeviceService, ServiceState, TerminationReason};
pub use error::{DeviceError, DeviceResult};
pub use protocol::{DeviceTopics, Pack, Record, TopicBuilder};
pub use transport::mqtt::MqttClient;
pub use transport::Transport;
