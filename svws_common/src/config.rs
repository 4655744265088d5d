//! Station configuration loading and validation.
//!
//! Configuration is one TOML file with a table per sensor; a sensor is
//! enabled iff its table is present. Loading is provided by the
//! [`ConfigLoader`] trait, semantic checks by [`StationConfig::validate`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use svws_common::config::{ConfigLoader, StationConfig};
//! use std::path::Path;
//!
//! let config = StationConfig::load(Path::new("/etc/svws/station.toml")).unwrap();
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the station configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/svws/station.toml";

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Common configuration fields shared across the workspace binaries.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "svws-station-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Semantic validation is a separate step (`validate()` on the config type)
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Station Configuration ──────────────────────────────────────────

/// Top-level station configuration.
///
/// Every sensor table is optional; the station only opens ports and pins for
/// tables that are present. An empty configuration is valid and yields
/// packets containing only the timestamp and unit marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub shared: SharedConfig,

    #[serde(default)]
    pub station: StationSection,

    /// Primary RS-485 bus.
    pub rs485: Option<BusConfig>,
    /// Secondary RS-485 bus (the reference hardware has two transceivers).
    pub rs485_aux: Option<BusConfig>,

    pub wind_direction: Option<ModbusSensorConfig>,
    pub wind_speed: Option<ModbusSensorConfig>,
    pub rain: Option<ModbusSensorConfig>,

    pub bms: Option<BmsConfig>,
    pub solar: Option<SolarConfig>,
    pub dht22: Option<DhtConfig>,
    pub onewire: Option<OnewireConfig>,
}

/// `[station]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSection {
    /// Seconds between loop packets. Poll duration is deducted.
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: f64,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            loop_interval_secs: default_loop_interval(),
        }
    }
}

fn default_loop_interval() -> f64 {
    2.0
}

/// One RS-485 bus (`[rs485]` / `[rs485_aux]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial device, e.g. `/dev/ttySC0`.
    pub port: String,

    #[serde(default = "default_rs485_baud")]
    pub baud: u32,

    /// Serial read timeout per transaction.
    #[serde(default = "default_rs485_timeout_ms")]
    pub timeout_ms: u64,

    /// Transceiver turnaround delay applied before each transaction.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// BCM pin driving the transceiver's transmit-enable line. Omit for
    /// transceivers with automatic direction control.
    #[serde(default)]
    pub txden_pin: Option<u8>,
}

fn default_rs485_baud() -> u32 {
    9600
}

fn default_rs485_timeout_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    100
}

/// Which declared bus a Modbus instrument hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusId {
    #[default]
    Rs485,
    Rs485Aux,
}

/// One Modbus register instrument (`[wind_direction]` / `[wind_speed]` / `[rain]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusSensorConfig {
    /// Modbus unit id, 1-247.
    pub address: u8,

    #[serde(default)]
    pub bus: BusId,
}

/// `[bms]` table: battery management system over UART.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmsConfig {
    /// Serial device, e.g. `/dev/ttyAMA0`.
    pub port: String,

    #[serde(default = "default_rs485_baud")]
    pub baud: u32,

    #[serde(default = "default_bms_timeout_ms")]
    pub timeout_ms: u64,

    /// BMS frame address.
    #[serde(default = "default_bms_address")]
    pub address: u8,
}

fn default_bms_timeout_ms() -> u64 {
    500
}

fn default_bms_address() -> u8 {
    8
}

/// `[solar]` table: charge controller speaking the VE.Direct text protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarConfig {
    /// Serial device, e.g. `/dev/ttyAMA1`.
    pub port: String,

    #[serde(default = "default_solar_baud")]
    pub baud: u32,

    /// Deadline for accumulating one valid text frame. The controller emits
    /// a frame roughly once per second.
    #[serde(default = "default_solar_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_solar_baud() -> u32 {
    19200
}

fn default_solar_timeout_ms() -> u64 {
    3000
}

/// `[dht22]` table: humidity/temperature sensor on a GPIO pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// BCM pin number of the data line.
    pub pin: u8,

    /// Read attempts per cycle before the sensor reports an error.
    #[serde(default = "default_dht_tries")]
    pub tries: u32,
}

fn default_dht_tries() -> u32 {
    4
}

/// `[onewire]` table: DS18B20 probes on the w1 bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnewireConfig {
    /// Root of the kernel w1 device tree.
    #[serde(default = "default_w1_devices_dir")]
    pub devices_dir: PathBuf,

    /// Probe inside the electronics enclosure.
    pub enclosure_id: Option<String>,

    // Soil probe ladder. All six must be present for the group to be polled;
    // a partial set is a validation error.
    pub soil_6_in_id: Option<String>,
    pub soil_2_ft_id: Option<String>,
    pub soil_4_ft_id: Option<String>,
    pub soil_6_ft_id: Option<String>,
    pub soil_8_ft_id: Option<String>,
    pub soil_10_ft_id: Option<String>,
}

fn default_w1_devices_dir() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

impl OnewireConfig {
    /// The six soil probe ids, shallowest first, iff all are configured.
    pub fn soil_ids(&self) -> Option<[&str; 6]> {
        match (
            &self.soil_6_in_id,
            &self.soil_2_ft_id,
            &self.soil_4_ft_id,
            &self.soil_6_ft_id,
            &self.soil_8_ft_id,
            &self.soil_10_ft_id,
        ) {
            (Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)) => {
                Some([a, b, c, d, e, f])
            }
            _ => None,
        }
    }

    fn soil_id_count(&self) -> usize {
        [
            &self.soil_6_in_id,
            &self.soil_2_ft_id,
            &self.soil_4_ft_id,
            &self.soil_6_ft_id,
            &self.soil_8_ft_id,
            &self.soil_10_ft_id,
        ]
        .iter()
        .filter(|id| id.is_some())
        .count()
    }
}

impl StationConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty or the loop interval is not positive
    /// - a declared bus has an empty port or zero baud rate
    /// - a Modbus instrument has an out-of-range unit id or references an
    ///   undeclared bus
    /// - the BMS/solar port is empty, `dht22.tries` is zero, or the soil
    ///   probe ladder is partially configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if !(self.station.loop_interval_secs > 0.0) {
            return Err(ConfigError::ValidationError(
                "station.loop_interval_secs must be positive".to_string(),
            ));
        }

        for (name, bus) in [("rs485", &self.rs485), ("rs485_aux", &self.rs485_aux)] {
            if let Some(bus) = bus {
                if bus.port.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "{name}.port cannot be empty"
                    )));
                }
                if bus.baud == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "{name}.baud must be positive"
                    )));
                }
            }
        }

        for (name, sensor) in [
            ("wind_direction", &self.wind_direction),
            ("wind_speed", &self.wind_speed),
            ("rain", &self.rain),
        ] {
            if let Some(sensor) = sensor {
                if !(1..=247).contains(&sensor.address) {
                    return Err(ConfigError::ValidationError(format!(
                        "{name}.address must be in 1-247, got {}",
                        sensor.address
                    )));
                }
                let declared = match sensor.bus {
                    BusId::Rs485 => self.rs485.is_some(),
                    BusId::Rs485Aux => self.rs485_aux.is_some(),
                };
                if !declared {
                    return Err(ConfigError::ValidationError(format!(
                        "{name} references an undeclared bus ({:?})",
                        sensor.bus
                    )));
                }
            }
        }

        if let Some(bms) = &self.bms {
            if bms.port.is_empty() {
                return Err(ConfigError::ValidationError(
                    "bms.port cannot be empty".to_string(),
                ));
            }
        }

        if let Some(solar) = &self.solar {
            if solar.port.is_empty() {
                return Err(ConfigError::ValidationError(
                    "solar.port cannot be empty".to_string(),
                ));
            }
        }

        if let Some(dht) = &self.dht22 {
            if dht.tries == 0 {
                return Err(ConfigError::ValidationError(
                    "dht22.tries must be at least 1".to_string(),
                ));
            }
        }

        if let Some(onewire) = &self.onewire {
            let soil = onewire.soil_id_count();
            if soil != 0 && soil != 6 {
                return Err(ConfigError::ValidationError(format!(
                    "soil probe ids must be configured as a full set of six, got {soil}"
                )));
            }
            if onewire.enclosure_id.is_none() && soil == 0 {
                return Err(ConfigError::ValidationError(
                    "[onewire] declared but no probe ids configured".to_string(),
                ));
            }
        }

        Ok(())
    }
}
