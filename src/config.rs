//! Device configuration loaded from a TOML file
//!
//! The configuration is read once at startup, validated, and then treated as
//! immutable for the lifetime of the process. Certificate material referenced
//! from the `[mqtt]` section is resolved separately by [`crate::tls`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/configs/export/config.toml";

/// Default broker address when neither the environment nor the file names one
pub const DEFAULT_MQTT_HOST: &str = "tcp://localhost:1883";

/// Environment variable overriding the configuration file path
pub const ENV_CONFIG_FILE: &str = "MF_EXPORT_CONFIG_FILE";

/// Environment variable overriding the broker address
pub const ENV_MQTT_HOST: &str = "MF_EXPORT_MQTT_HOST";

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    pub board_config: BoardSection,
    #[serde(default)]
    pub device: DeviceSection,
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Fallback log level when `LOG_LEVEL` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// MQTT connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URI, e.g. `tcp://localhost:1883` or `ssl://broker:8883`
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Quality-of-service level used for every publish and subscribe (0..=2)
    #[serde(default)]
    pub qos: u8,
    /// Retain flag used for every publish
    #[serde(default)]
    pub retain: bool,
    /// Enable mutual TLS on the broker connection
    #[serde(default)]
    pub mtls: bool,
    /// Path to the CA bundle (PEM)
    #[serde(default)]
    pub ca_path: String,
    /// Path to the client certificate (PEM); wins over `client_cert`
    #[serde(default)]
    pub client_cert_path: String,
    /// Path to the client private key (PEM); wins over `client_cert_key`
    #[serde(default)]
    pub client_priv_key_path: String,
    /// Inline client certificate (PEM)
    #[serde(default)]
    pub client_cert: String,
    /// Inline client private key (PEM)
    #[serde(default)]
    pub client_cert_key: String,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            qos: 0,
            retain: false,
            mtls: false,
            ca_path: String::new(),
            client_cert_path: String::new(),
            client_priv_key_path: String::new(),
            client_cert: String::new(),
            client_cert_key: String::new(),
        }
    }
}

fn default_mqtt_host() -> String {
    DEFAULT_MQTT_HOST.to_string()
}

/// Identity and channel assignment provisioned for this device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardSection {
    /// Thing identifier; used as MQTT username and as the device id in topics
    pub thing_id: String,
    /// Thing secret; used as MQTT password
    pub thing_key: String,
    /// Authorization token
    pub token: String,
    /// Channel carrying heartbeats and inbound commands
    pub control_channel_id: String,
    /// Channel carrying telemetry
    pub export_channel_id: String,
}

/// Agent behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// MQTT client identifier
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// SenML base name, also the telemetry sub-topic
    #[serde(default = "default_sensor_name")]
    pub sensor_name: String,
    /// Telemetry sampling interval in milliseconds
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u64,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Upper bound on the initial connect handshake, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            sensor_name: default_sensor_name(),
            telemetry_interval_ms: default_telemetry_interval(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_service_name() -> String {
    "device_test".to_string()
}

fn default_sensor_name() -> String {
    "sensorTest".to_string()
}

fn default_telemetry_interval() -> u64 {
    2000
}

fn default_heartbeat_interval() -> u64 {
    10_000
}

fn default_connect_timeout() -> u64 {
    30
}

impl DeviceSection {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DeviceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the rest of the agent relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let board = &self.board_config;
        validate_identifier("board_config.thing_id", &board.thing_id)?;
        require_non_empty("board_config.thing_key", &board.thing_key)?;
        require_non_empty("board_config.token", &board.token)?;
        validate_identifier(
            "board_config.control_channel_id",
            &board.control_channel_id,
        )?;
        validate_identifier("board_config.export_channel_id", &board.export_channel_id)?;

        validate_identifier("device.sensor_name", &self.device.sensor_name)?;
        require_non_empty("device.service_name", &self.device.service_name)?;

        if self.mqtt.qos > 2 {
            return Err(ConfigError::InvalidField {
                field: "mqtt.qos",
                reason: format!("{} is not a QoS level (expected 0, 1 or 2)", self.mqtt.qos),
            });
        }

        for (field, value) in [
            (
                "device.telemetry_interval_ms",
                self.device.telemetry_interval_ms,
            ),
            (
                "device.heartbeat_interval_ms",
                self.device.heartbeat_interval_ms,
            ),
            ("device.connect_timeout_secs", self.device.connect_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Device identifier used in every topic
    pub fn device_id(&self) -> &str {
        &self.board_config.thing_id
    }

    /// Copy with credentials and private key material blanked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.board_config.thing_key,
            &mut copy.board_config.token,
            &mut copy.mqtt.client_cert_key,
        ] {
            if !secret.is_empty() {
                *secret = "<redacted>".to_string();
            }
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
host = "tcp://localhost:1883"
qos = 1

[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}

/// Identifiers are spliced into topic levels, so they may not contain
/// level separators or wildcards.
fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    require_non_empty(field, value)?;

    if let Some(c) = value.chars().find(|c| matches!(*c, '/' | '+' | '#')) {
        return Err(ConfigError::InvalidField {
            field,
            reason: format!("'{value}' contains reserved topic character '{c}'"),
        });
    }

    Ok(())
}
