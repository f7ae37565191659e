//! MQTT Integration Test Helpers
//!
//! Provides helper utilities for integration tests with an MQTT broker.
//! The broker tests are `#[ignore]`d and expect an anonymous broker at
//! localhost:1883 (`cargo test -- --ignored`).

#![allow(dead_code)]

use device_agent::config::DeviceConfig;

/// MQTT broker URL used by the ignored broker tests
pub const MQTT_BROKER_URL: &str = "tcp://localhost:1883";

/// Device config with a unique client id so parallel tests do not evict
/// each other's sessions
pub fn broker_config(service_name: &str) -> DeviceConfig {
    DeviceConfig::from_toml_str(&format!(
        r#"
[mqtt]
host = "{MQTT_BROKER_URL}"
qos = 1

[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"

[device]
service_name = "{service_name}"
telemetry_interval_ms = 100
heartbeat_interval_ms = 200
connect_timeout_secs = 5
"#
    ))
    .expect("Broker test config should be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_uses_localhost() {
        let config = broker_config("helper-check");
        assert_eq!(config.mqtt.host, "tcp://localhost:1883");
        assert_eq!(config.device.service_name, "helper-check");
    }
}
