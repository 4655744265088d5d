//! Status code tables for the charge controller.
//!
//! Loop packets carry the raw numeric codes; these tables put names on them
//! for logs and the commissioning probe.

use bitflags::bitflags;
use std::fmt;

/// Charger operating state (`CS` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Off,
    LowPower,
    Fault,
    Bulk,
    Absorption,
    Float,
    Storage,
    Equalize,
    Inverting,
    PowerSupply,
    StartingUp,
    RepeatedAbsorption,
    AutoEqualize,
    BatterySafe,
    ExternalControl,
    Unknown(u16),
}

impl DeviceState {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Off,
            1 => Self::LowPower,
            2 => Self::Fault,
            3 => Self::Bulk,
            4 => Self::Absorption,
            5 => Self::Float,
            6 => Self::Storage,
            7 => Self::Equalize,
            9 => Self::Inverting,
            11 => Self::PowerSupply,
            245 => Self::StartingUp,
            246 => Self::RepeatedAbsorption,
            247 => Self::AutoEqualize,
            248 => Self::BatterySafe,
            252 => Self::ExternalControl,
            other => Self::Unknown(other),
        }
    }

    /// Raw code for the loop packet.
    pub fn code(self) -> u16 {
        match self {
            Self::Off => 0,
            Self::LowPower => 1,
            Self::Fault => 2,
            Self::Bulk => 3,
            Self::Absorption => 4,
            Self::Float => 5,
            Self::Storage => 6,
            Self::Equalize => 7,
            Self::Inverting => 9,
            Self::PowerSupply => 11,
            Self::StartingUp => 245,
            Self::RepeatedAbsorption => 246,
            Self::AutoEqualize => 247,
            Self::BatterySafe => 248,
            Self::ExternalControl => 252,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::LowPower => "low power",
            Self::Fault => "fault",
            Self::Bulk => "bulk",
            Self::Absorption => "absorption",
            Self::Float => "float",
            Self::Storage => "storage",
            Self::Equalize => "equalize (manual)",
            Self::Inverting => "inverting",
            Self::PowerSupply => "power supply",
            Self::StartingUp => "starting-up",
            Self::RepeatedAbsorption => "repeated absorption",
            Self::AutoEqualize => "auto equalize / recondition",
            Self::BatterySafe => "battery safe",
            Self::ExternalControl => "external control",
            Self::Unknown(code) => return write!(f, "unknown state {code}"),
        };
        f.write_str(name)
    }
}

/// Charger error register (`ERR` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    BatteryVoltageTooHigh,
    ChargerTemperatureTooHigh,
    ChargerOverCurrent,
    ChargerCurrentReversed,
    BulkTimeLimitExceeded,
    CurrentSensorIssue,
    TerminalsOverheated,
    ConverterIssue,
    InputVoltageTooHigh,
    InputCurrentTooHigh,
    InputShutdownBatteryVoltage,
    InputShutdownCurrentFlow,
    CalibrationDataLost,
    InvalidFirmware,
    InvalidSettings,
    Unknown(u16),
}

impl ErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::NoError,
            2 => Self::BatteryVoltageTooHigh,
            17 => Self::ChargerTemperatureTooHigh,
            18 => Self::ChargerOverCurrent,
            19 => Self::ChargerCurrentReversed,
            20 => Self::BulkTimeLimitExceeded,
            21 => Self::CurrentSensorIssue,
            26 => Self::TerminalsOverheated,
            28 => Self::ConverterIssue,
            33 => Self::InputVoltageTooHigh,
            34 => Self::InputCurrentTooHigh,
            38 => Self::InputShutdownBatteryVoltage,
            39 => Self::InputShutdownCurrentFlow,
            116 => Self::CalibrationDataLost,
            117 => Self::InvalidFirmware,
            119 => Self::InvalidSettings,
            other => Self::Unknown(other),
        }
    }

    /// Raw code for the loop packet.
    pub fn code(self) -> u16 {
        match self {
            Self::NoError => 0,
            Self::BatteryVoltageTooHigh => 2,
            Self::ChargerTemperatureTooHigh => 17,
            Self::ChargerOverCurrent => 18,
            Self::ChargerCurrentReversed => 19,
            Self::BulkTimeLimitExceeded => 20,
            Self::CurrentSensorIssue => 21,
            Self::TerminalsOverheated => 26,
            Self::ConverterIssue => 28,
            Self::InputVoltageTooHigh => 33,
            Self::InputCurrentTooHigh => 34,
            Self::InputShutdownBatteryVoltage => 38,
            Self::InputShutdownCurrentFlow => 39,
            Self::CalibrationDataLost => 116,
            Self::InvalidFirmware => 117,
            Self::InvalidSettings => 119,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "no error",
            Self::BatteryVoltageTooHigh => "battery voltage too high",
            Self::ChargerTemperatureTooHigh => "charger temperature too high",
            Self::ChargerOverCurrent => "charger over current",
            Self::ChargerCurrentReversed => "charger current reversed",
            Self::BulkTimeLimitExceeded => "bulk time limit exceeded",
            Self::CurrentSensorIssue => "current sensor issue",
            Self::TerminalsOverheated => "terminals overheated",
            Self::ConverterIssue => "converter issue",
            Self::InputVoltageTooHigh => "input voltage too high",
            Self::InputCurrentTooHigh => "input current too high",
            Self::InputShutdownBatteryVoltage => "input shutdown (battery voltage)",
            Self::InputShutdownCurrentFlow => "input shutdown (current flow)",
            Self::CalibrationDataLost => "factory calibration data lost",
            Self::InvalidFirmware => "invalid firmware",
            Self::InvalidSettings => "invalid settings",
            Self::Unknown(code) => return write!(f, "unknown error {code}"),
        };
        f.write_str(name)
    }
}

/// MPP tracker operating mode (`MPPT` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMode {
    Off,
    Limited,
    Tracking,
    Unknown(u16),
}

impl TrackerMode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Off,
            1 => Self::Limited,
            2 => Self::Tracking,
            other => Self::Unknown(other),
        }
    }

    /// Raw code for the loop packet.
    pub fn code(self) -> u16 {
        match self {
            Self::Off => 0,
            Self::Limited => 1,
            Self::Tracking => 2,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for TrackerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Limited => "voltage or current limited",
            Self::Tracking => "MPP tracking",
            Self::Unknown(code) => return write!(f, "unknown mode {code}"),
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Why the charger is off (`OR` field), reported as a hex bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OffReason: u32 {
        const NO_INPUT_POWER = 0x0000_0001;
        const SWITCHED_OFF_POWER_SWITCH = 0x0000_0002;
        const SWITCHED_OFF_REGISTER = 0x0000_0004;
        const REMOTE_INPUT = 0x0000_0008;
        const PROTECTION_ACTIVE = 0x0000_0010;
        const PAYGO = 0x0000_0020;
        const BMS = 0x0000_0040;
        const ENGINE_SHUTDOWN = 0x0000_0080;
        const ANALYSING_INPUT_VOLTAGE = 0x0000_0100;
    }
}

impl OffReason {
    /// Parse the wire representation, e.g. `0x00000001`.
    pub fn from_hex(value: &str) -> Option<Self> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        let raw = u32::from_str_radix(digits, 16).ok()?;
        Some(Self::from_bits_retain(raw))
    }
}
