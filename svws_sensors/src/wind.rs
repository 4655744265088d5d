//! Wind vane and anemometer.
//!
//! Both are RS-485 register devices reporting their current reading in
//! tenths at register 0x0000: the vane in degrees, the anemometer in m/s.
//! They share a bus with each other (and possibly the rain gauge), so each
//! instrument holds a handle to the shared master.

use crate::modbus::ModbusRtu;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use svws_common::units;

/// Register holding the current reading on both wind sensors.
const READING_REGISTER: u16 = 0x0000;

/// Wind direction sensor.
pub struct WindVane<T> {
    bus: Arc<Mutex<ModbusRtu<T>>>,
    unit: u8,
}

impl<T> WindVane<T> {
    pub fn new(bus: Arc<Mutex<ModbusRtu<T>>>, unit: u8) -> Self {
        Self { bus, unit }
    }
}

impl<T: Read + Write> Instrument for WindVane<T> {
    fn label(&self) -> &str {
        "wind_direction"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let mut bus = self.bus.lock().expect("bus lock poisoned");
        let degrees = bus.read_register_tenths(self.unit, READING_REGISTER)?;
        if !(0.0..=360.0).contains(&degrees) {
            return Err(SensorError::InvalidResponse(format!(
                "wind direction {degrees} out of range"
            )));
        }
        Ok(vec![(field::WIND_DIR, Value::Float(degrees))])
    }
}

/// Wind speed sensor. Reports m/s on the wire; the packet carries mph.
pub struct Anemometer<T> {
    bus: Arc<Mutex<ModbusRtu<T>>>,
    unit: u8,
}

impl<T> Anemometer<T> {
    pub fn new(bus: Arc<Mutex<ModbusRtu<T>>>, unit: u8) -> Self {
        Self { bus, unit }
    }
}

impl<T: Read + Write> Instrument for Anemometer<T> {
    fn label(&self) -> &str {
        "wind_speed"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let mut bus = self.bus.lock().expect("bus lock poisoned");
        let mps = bus.read_register_tenths(self.unit, READING_REGISTER)?;
        Ok(vec![(field::WIND_SPEED, Value::Float(units::mps_to_mph(mps)))])
    }
}
