use std::io::Write;

use rs485_master::DirectionConfig;
use tempfile::NamedTempFile;
use zenoh_bridge_rs485::config::{ConfigError, Rs485BridgeConfig};
use zenoh_bridge_rs485::Format;

#[test]
fn test_example_config_is_valid() {
    let config = Rs485BridgeConfig::parse(include_str!("../rs485.json5")).unwrap();

    assert_eq!(config.bus.port, "/dev/ttyS1");
    assert_eq!(config.bus.direction, DirectionConfig::None);
    assert_eq!(config.slaves.len(), 2);
    assert_eq!(config.slaves[0].register_count, 6);
    assert_eq!(config.slaves[0].poll_interval_ms, 2000);
    assert_eq!(config.slaves[1].register_count, 4);
    assert_eq!(config.slaves[1].poll_interval_ms, 5000);
    assert_eq!(config.publish.format, Format::Json);
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            bus: {{ port: "/dev/ttyUSB0", baud_rate: 38400 }},
            slaves: [ {{ address: 9, register_start: 40, register_count: 2, name: "flow" }} ],
            publish: {{ format: "cbor" }},
        }}"#
    )
    .unwrap();

    let config = Rs485BridgeConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.bus.baud_rate, 38400);
    assert_eq!(config.slaves[0].display_name(), "flow");
    assert_eq!(config.slaves[0].poll_interval_ms, 1000);
    assert_eq!(config.publish.format, Format::Cbor);
}

#[test]
fn test_load_errors() {
    let missing = Rs485BridgeConfig::load_from_file("/nonexistent/rs485.json5");
    assert!(matches!(missing, Err(ConfigError::Io(_))));

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ bus: ").unwrap();
    assert!(matches!(
        Rs485BridgeConfig::load_from_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}
