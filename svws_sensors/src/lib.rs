//! Sensor protocol clients for the SVWS station.
//!
//! Each module is a self-contained client for one of the station's sensor
//! buses. The reading side of every client implements
//! [`svws_common::instrument::Instrument`], so the station can poll them
//! uniformly.
//!
//! # Module Structure
//!
//! - [`modbus`] - Modbus RTU master for the RS-485 buses
//! - [`wind`] - Wind vane and anemometer (Modbus registers)
//! - [`rain`] - Tipping-bucket rain gauge (Modbus register with clear-write)
//! - [`bms`] - Battery management system client (framed UART protocol)
//! - [`vedirect`] - Solar charge controller (VE.Direct text protocol)
//! - [`onewire`] - DS18B20 probes over the kernel w1 bus
//! - [`dht22`] - DHT22 humidity/temperature sensor (GPIO bit-bang)

pub mod bms;
pub mod dht22;
pub mod modbus;
pub mod onewire;
pub mod rain;
pub mod vedirect;
pub mod wind;
