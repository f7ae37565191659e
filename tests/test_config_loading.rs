//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading: defaults, required
//! identity fields, and the errors reported for bad input.

use device_agent::config::{ConfigError, DeviceConfig, DEFAULT_MQTT_HOST};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[server]
log_level = "debug"

[mqtt]
host = "ssl://broker.example.com:8883"
qos = 2
retain = true

[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"

[device]
service_name = "pump_station"
sensor_name = "pressure"
telemetry_interval_ms = 500
heartbeat_interval_ms = 5000
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.mqtt.host, "ssl://broker.example.com:8883");
    assert_eq!(config.mqtt.qos, 2);
    assert!(config.mqtt.retain);
    assert_eq!(config.device_id(), "dev42");
    assert_eq!(config.device.service_name, "pump_station");
    assert_eq!(config.device.sensor_name, "pressure");
    assert_eq!(config.device.telemetry_interval_ms, 500);
    assert_eq!(config.device.heartbeat_interval_ms, 5000);
}

#[test]
fn test_config_applies_defaults_for_optional_sections() {
    let temp_file = write_config(
        r#"
[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.server.log_level, "info");
    assert_eq!(config.mqtt.host, DEFAULT_MQTT_HOST);
    assert_eq!(config.mqtt.qos, 0);
    assert!(!config.mqtt.retain);
    assert!(!config.mqtt.mtls);
    assert_eq!(config.device.service_name, "device_test");
    assert_eq!(config.device.sensor_name, "sensorTest");
    assert_eq!(config.device.telemetry_interval_ms, 2000);
    assert_eq!(config.device.heartbeat_interval_ms, 10_000);
    assert_eq!(config.device.connect_timeout_secs, 30);
}

#[test]
fn test_config_fails_on_missing_file() {
    let result = DeviceConfig::load_from_file(Path::new("/nonexistent/device/config.toml"));

    assert!(
        matches!(result, Err(ConfigError::FileRead(_))),
        "Missing file should be a read error"
    );
}

#[test]
fn test_config_fails_on_malformed_toml() {
    let temp_file = write_config("[board_config\nthing_id = ");

    let result = DeviceConfig::load_from_file(temp_file.path());

    assert!(
        matches!(result, Err(ConfigError::TomlParse(_))),
        "Malformed TOML should be a parse error"
    );
}

#[test]
fn test_config_fails_without_board_section() {
    let result = DeviceConfig::from_toml_str("[mqtt]\nqos = 1\n");

    assert!(
        matches!(result, Err(ConfigError::TomlParse(_))),
        "board_config is mandatory"
    );
}

#[test]
fn test_config_rejects_empty_thing_id() {
    let result = DeviceConfig::from_toml_str(
        r#"
[board_config]
thing_id = ""
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"
"#,
    );

    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("thing_id"),
        "Error should name the missing field: {err}"
    );
}

#[test]
fn test_config_rejects_channel_ids_with_topic_separators() {
    let result = DeviceConfig::from_toml_str(
        r#"
[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl/1"
export_channel_id = "exp1"
"#,
    );

    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("control_channel_id"),
        "Error should name the offending field: {err}"
    );
}

#[test]
fn test_config_rejects_qos_out_of_range() {
    let result = DeviceConfig::from_toml_str(
        r#"
[mqtt]
qos = 3

[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"
"#,
    );

    assert!(matches!(
        result,
        Err(ConfigError::InvalidField { field: "mqtt.qos", .. })
    ));
}

#[test]
fn test_config_rejects_zero_interval() {
    let result = DeviceConfig::from_toml_str(
        r#"
[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"

[device]
telemetry_interval_ms = 0
"#,
    );

    assert!(matches!(
        result,
        Err(ConfigError::InvalidField {
            field: "device.telemetry_interval_ms",
            ..
        })
    ));
}

#[test]
fn test_redacted_config_round_trips_through_toml() {
    let config = DeviceConfig::from_toml_str(
        r#"
[board_config]
thing_id = "dev42"
thing_key = "secret"
token = "token"
control_channel_id = "ctl1"
export_channel_id = "exp1"
"#,
    )
    .unwrap();

    let rendered = toml::to_string_pretty(&config.redacted()).unwrap();

    assert!(!rendered.contains("\"secret\""), "thing_key must not be shown");
    assert!(rendered.contains("dev42"));
    let reparsed = DeviceConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed.board_config.thing_key, "<redacted>");
    assert_eq!(reparsed.device, config.device);
}
