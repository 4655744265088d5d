//! Config loading tests.
//!
//! Tests for `ConfigLoader::load()` and `StationConfig::validate()` against
//! real files: missing file, syntax errors, a full reference-station config.

use std::fs;
use svws_common::config::{BusId, ConfigError, ConfigLoader, LogLevel, StationConfig};
use tempfile::TempDir;

#[test]
fn load_missing_file() {
    let result = StationConfig::load(std::path::Path::new("/nonexistent/station.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn load_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("station.toml");
    fs::write(&path, "invalid toml {{{{").unwrap();

    let result = StationConfig::load(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn load_full_station_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("station.toml");
    fs::write(
        &path,
        r#"
[shared]
log_level = "debug"
service_name = "svws-station"

[station]
loop_interval_secs = 2.5

[rs485]
port = "/dev/ttySC1"
txden_pin = 22

[rs485_aux]
port = "/dev/ttySC0"
txden_pin = 27

[wind_direction]
address = 16

[wind_speed]
address = 17

[rain]
address = 32
bus = "rs485_aux"

[bms]
port = "/dev/ttyAMA0"

[solar]
port = "/dev/ttyAMA1"

[dht22]
pin = 17

[onewire]
enclosure_id = "0000071c9e1e"
soil_6_in_id = "0000071d0001"
soil_2_ft_id = "0000071d0002"
soil_4_ft_id = "0000071d0003"
soil_6_ft_id = "0000071d0004"
soil_8_ft_id = "0000071d0005"
soil_10_ft_id = "0000071d0006"
"#,
    )
    .unwrap();

    let config = StationConfig::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.station.loop_interval_secs, 2.5);
    assert_eq!(config.rs485.as_ref().unwrap().txden_pin, Some(22));
    assert_eq!(config.wind_direction.as_ref().unwrap().bus, BusId::Rs485);
    assert_eq!(config.rain.as_ref().unwrap().bus, BusId::Rs485Aux);
    assert_eq!(config.rain.as_ref().unwrap().address, 32);
    assert_eq!(config.dht22.as_ref().unwrap().tries, 4);
    assert!(config.onewire.as_ref().unwrap().soil_ids().is_some());
}

#[test]
fn unknown_log_level_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("station.toml");
    fs::write(
        &path,
        r#"
[shared]
log_level = "chatty"
service_name = "svws-station"
"#,
    )
    .unwrap();

    let result = StationConfig::load(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}
