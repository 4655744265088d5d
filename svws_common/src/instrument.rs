//! Sensor abstraction trait and error types.
//!
//! This module defines:
//! - `Instrument` trait - Interface the station polls each cycle
//! - `SensorError` enum - Error types for sensor operations
//! - `Observation` - One (field, value) pair contributed to a packet

use crate::record::Value;
use thiserror::Error;

/// Error types for sensor operations.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No (complete) response within the transport deadline
    #[error("timed out waiting for response")]
    Timeout,

    /// Serial port error
    #[error("serial port error: {0}")]
    Serial(String),

    /// GPIO error
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Structurally malformed frame
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Frame checksum/CRC mismatch
    #[error("checksum mismatch")]
    Checksum,

    /// Device answered with a Modbus exception response
    #[error("Modbus exception: function {function:#04x}, code {code:#04x}")]
    ModbusException { function: u8, code: u8 },

    /// Device is present but has no reading ready yet
    #[error("device not ready")]
    NotReady,

    /// Well-formed response with out-of-range or unparsable content
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One observation: a canonical field name and its value.
pub type Observation = (&'static str, Value);

/// Interface for pluggable sensor drivers.
///
/// The station polls each configured instrument once per loop cycle.
/// `observe()` either returns the full set of observations the sensor
/// contributes or an error; it never returns placeholder values. A failing
/// instrument costs its fields for the cycle, nothing more.
pub trait Instrument {
    /// Short human-readable label used in log messages.
    fn label(&self) -> &str;

    /// Take one reading set from the hardware.
    ///
    /// May block for the duration of the underlying transaction (serial
    /// round-trip, one-wire conversion read, GPIO pulse train).
    fn observe(&mut self) -> Result<Vec<Observation>, SensorError>;
}
