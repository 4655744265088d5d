//! Unit conversion helpers.
//!
//! The station emits US-convention packets while the sensors report metric or
//! raw register values; every conversion the drivers need lives here. All
//! functions are total and side-effect free.

/// Metres/second to miles/hour.
pub const MPS_TO_MPH: f64 = 2.236936;

/// Celsius to Fahrenheit.
pub fn c_to_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Millivolts to volts.
pub fn mv_to_v(millivolts: f64) -> f64 {
    millivolts / 1000.0
}

/// Milliamps to amps.
pub fn ma_to_a(milliamps: f64) -> f64 {
    milliamps / 1000.0
}

/// Metres/second to miles/hour.
pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPS_TO_MPH
}

/// Hundredths of a kilowatt-hour to watt-hours.
///
/// The solar controller's yield counters (`H19`/`H20`/`H22`) are reported in
/// 0.01 kWh increments.
pub fn ckwh_to_wh(ckwh: f64) -> f64 {
    ckwh * 10.0
}

/// Millidegrees Celsius (one-wire sysfs representation) to Celsius.
pub fn millidegrees_to_c(millidegrees: i32) -> f64 {
    f64::from(millidegrees) / 1000.0
}

/// Decode a register holding a value in tenths.
pub fn tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}
