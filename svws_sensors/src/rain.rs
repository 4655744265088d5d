//! Tipping-bucket rain gauge.
//!
//! The gauge accumulates tips in a register; the station reads the
//! accumulation since the previous packet and then writes the clear command
//! so the next packet reports a fresh delta.

use crate::modbus::ModbusRtu;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use tracing::warn;

const ACCUMULATOR_REGISTER: u16 = 0x0000;
/// Vendor-defined magic value that zeroes the accumulator.
const CLEAR_COMMAND: u16 = 0x005A;

pub struct RainGauge<T> {
    bus: Arc<Mutex<ModbusRtu<T>>>,
    unit: u8,
}

impl<T> RainGauge<T> {
    pub fn new(bus: Arc<Mutex<ModbusRtu<T>>>, unit: u8) -> Self {
        Self { bus, unit }
    }
}

impl<T: Read + Write> Instrument for RainGauge<T> {
    fn label(&self) -> &str {
        "rain"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let mut bus = self.bus.lock().expect("bus lock poisoned");
        let rain = bus.read_register_tenths(self.unit, ACCUMULATOR_REGISTER)?;

        // A failed clear costs double counting on the next cycle, which is
        // recoverable downstream; dropping the reading is not.
        if let Err(err) = bus.write_single_register(self.unit, ACCUMULATOR_REGISTER, CLEAR_COMMAND)
        {
            warn!("rain gauge clear failed after read: {err}");
        }

        Ok(vec![(field::RAIN, Value::Float(rain))])
    }
}
