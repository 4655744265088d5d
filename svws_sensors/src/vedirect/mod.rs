//! Solar charge controller client (VE.Direct text protocol).
//!
//! The controller emits unsolicited text frames about once a second. Fields
//! are `\r\n<label>\t<value>`; a frame ends with the `Checksum` field, and
//! the byte sum of the whole frame including the checksum byte is 0 mod 256.
//! Interleaved HEX-protocol records (lines starting `:`) are skipped and do
//! not take part in the checksum.

pub mod codes;

use codes::{DeviceState, ErrorCode, OffReason, TrackerMode};
use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};
use svws_common::config::SolarConfig;
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use svws_common::units;

/// One decoded text frame: raw label/value pairs plus typed accessors.
///
/// The controller only transmits fields its model supports, so every
/// accessor is an `Option`; an absent or unparsable field stays absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFrame {
    fields: HashMap<String, String>,
}

impl TextFrame {
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields.get(label).map(String::as_str)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    fn numeric(&self, label: &str) -> Option<f64> {
        self.get(label)?.parse().ok()
    }

    fn code(&self, label: &str) -> Option<u16> {
        self.get(label)?.parse().ok()
    }

    /// `V`: battery voltage in volts.
    pub fn battery_voltage(&self) -> Option<f64> {
        self.numeric("V").map(units::mv_to_v)
    }

    /// `I`: battery current in amps, negative while discharging.
    pub fn battery_current(&self) -> Option<f64> {
        self.numeric("I").map(units::ma_to_a)
    }

    /// `VPV`: panel voltage in volts.
    pub fn panel_voltage(&self) -> Option<f64> {
        self.numeric("VPV").map(units::mv_to_v)
    }

    /// `PPV`: panel power in watts.
    pub fn panel_power(&self) -> Option<f64> {
        self.numeric("PPV")
    }

    /// `CS`: charger operating state.
    pub fn device_state(&self) -> Option<DeviceState> {
        self.code("CS").map(DeviceState::from_code)
    }

    /// `MPPT`: tracker operating mode.
    pub fn tracker_mode(&self) -> Option<TrackerMode> {
        self.code("MPPT").map(TrackerMode::from_code)
    }

    /// `ERR`: charger error register.
    pub fn error(&self) -> Option<ErrorCode> {
        self.code("ERR").map(ErrorCode::from_code)
    }

    /// `OR`: off-reason bitmask.
    pub fn off_reason(&self) -> Option<OffReason> {
        OffReason::from_hex(self.get("OR")?)
    }

    /// `LOAD`: load output state.
    pub fn load_output(&self) -> Option<bool> {
        self.get("LOAD").map(|v| v == "ON")
    }

    /// `IL`: load current in amps.
    pub fn load_current(&self) -> Option<f64> {
        self.numeric("IL").map(units::ma_to_a)
    }

    /// `H19`: lifetime yield in watt-hours.
    pub fn yield_total(&self) -> Option<f64> {
        self.numeric("H19").map(units::ckwh_to_wh)
    }

    /// `H20`: yield today in watt-hours.
    pub fn yield_today(&self) -> Option<f64> {
        self.numeric("H20").map(units::ckwh_to_wh)
    }

    /// `H22`: yield yesterday in watt-hours.
    pub fn yield_yesterday(&self) -> Option<f64> {
        self.numeric("H22").map(units::ckwh_to_wh)
    }

    /// `H21`: maximum power today in watts.
    pub fn max_power_today(&self) -> Option<f64> {
        self.numeric("H21")
    }

    /// `H23`: maximum power yesterday in watts.
    pub fn max_power_yesterday(&self) -> Option<f64> {
        self.numeric("H23")
    }

    /// `HSDS`: day sequence number, 0-364.
    pub fn day_sequence(&self) -> Option<i64> {
        self.get("HSDS")?.parse().ok()
    }
}

// ─── Frame assembly ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between frames: skip bytes until a field header starts.
    Idle,
    WaitHeader,
    InKey,
    InValue,
    InChecksum,
    Hex,
}

/// Byte-at-a-time frame assembler.
///
/// Mirrors the protocol's own structure: bytes are summed as they arrive and
/// a frame is complete when its `Checksum` field lands; frames whose sum is
/// not 0 mod 256 are discarded silently and assembly continues with the next
/// frame.
struct FrameAssembler {
    state: State,
    checksum: u8,
    key: Vec<u8>,
    value: Vec<u8>,
    fields: HashMap<String, String>,
}

impl FrameAssembler {
    fn new() -> Self {
        Self {
            state: State::Idle,
            checksum: 0,
            key: Vec::new(),
            value: Vec::new(),
            fields: HashMap::new(),
        }
    }

    fn push(&mut self, byte: u8) -> Option<TextFrame> {
        if byte == b':' && self.state != State::InChecksum {
            self.state = State::Hex;
        }

        match self.state {
            State::Hex => {
                self.checksum = 0;
                if byte == b'\n' {
                    self.state = State::Idle;
                }
                None
            }
            State::Idle => {
                if byte == b'\r' {
                    self.checksum = byte;
                    self.state = State::WaitHeader;
                }
                None
            }
            State::WaitHeader => {
                self.checksum = self.checksum.wrapping_add(byte);
                if byte == b'\n' {
                    self.state = State::InKey;
                    self.key.clear();
                }
                None
            }
            State::InKey => {
                self.checksum = self.checksum.wrapping_add(byte);
                if byte == b'\t' {
                    if self.key == b"Checksum" {
                        self.state = State::InChecksum;
                    } else {
                        self.state = State::InValue;
                        self.value.clear();
                    }
                } else {
                    self.key.push(byte);
                }
                None
            }
            State::InValue => {
                self.checksum = self.checksum.wrapping_add(byte);
                if byte == b'\r' {
                    self.state = State::WaitHeader;
                    let key = String::from_utf8_lossy(&self.key).into_owned();
                    let value = String::from_utf8_lossy(&self.value).into_owned();
                    self.fields.insert(key, value);
                } else {
                    self.value.push(byte);
                }
                None
            }
            State::InChecksum => {
                self.checksum = self.checksum.wrapping_add(byte);
                self.state = State::Idle;
                let valid = self.checksum == 0;
                self.checksum = 0;
                let fields = std::mem::take(&mut self.fields);
                valid.then_some(TextFrame { fields })
            }
        }
    }
}

// ─── Reader ─────────────────────────────────────────────────────────

/// Accumulates serial bytes into whole checksum-valid frames.
pub struct VeDirectReader<T> {
    transport: T,
    deadline: Duration,
}

impl<T: Read> VeDirectReader<T> {
    pub fn new(transport: T, deadline: Duration) -> Self {
        Self {
            transport,
            deadline,
        }
    }

    /// Read until one whole valid frame is seen or the deadline passes.
    ///
    /// The stream is joined at an arbitrary point, so the first partial
    /// frame (and any frame failing its checksum) is discarded byte-wise.
    pub fn read_frame(&mut self) -> Result<TextFrame, SensorError> {
        let start = Instant::now();
        let mut assembler = FrameAssembler::new();
        let mut byte = [0u8; 1];

        while start.elapsed() < self.deadline {
            match self.transport.read(&mut byte) {
                Ok(0) => return Err(SensorError::Timeout),
                Ok(_) => {
                    if let Some(frame) = assembler.push(byte[0]) {
                        return Ok(frame);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(SensorError::Io(e)),
            }
        }

        Err(SensorError::Timeout)
    }
}

/// Solar charge controller as a station instrument.
pub struct SolarCharger<T> {
    reader: VeDirectReader<T>,
}

impl<T: Read> SolarCharger<T> {
    pub fn new(reader: VeDirectReader<T>) -> Self {
        Self { reader }
    }

    pub fn read_frame(&mut self) -> Result<TextFrame, SensorError> {
        self.reader.read_frame()
    }
}

impl<T: Read> Instrument for SolarCharger<T> {
    fn label(&self) -> &str {
        "solar"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let frame = self.reader.read_frame()?;
        let mut obs: Vec<Observation> = Vec::new();

        if let Some(v) = frame.battery_voltage() {
            obs.push((field::VE_BAT_VOLTAGE, Value::Float(v)));
        }
        if let Some(a) = frame.battery_current() {
            obs.push((field::VE_TOTAL_CURRENT, Value::Float(a)));
        }
        if let Some(v) = frame.panel_voltage() {
            obs.push((field::VE_PANEL_VOLTAGE, Value::Float(v)));
        }
        if let Some(w) = frame.panel_power() {
            obs.push((field::VE_PANEL_POWER, Value::Float(w)));
        }
        if let Some(state) = frame.device_state() {
            obs.push((field::VE_MODE, Value::Int(i64::from(state.code()))));
        }
        if let Some(mode) = frame.tracker_mode() {
            obs.push((field::VE_MPPT, Value::Int(i64::from(mode.code()))));
        }
        if let Some(mask) = frame.off_reason() {
            obs.push((field::VE_OFF_REASON, Value::Int(i64::from(mask.bits()))));
        }
        if let Some(err) = frame.error() {
            obs.push((field::VE_ERROR, Value::Int(i64::from(err.code()))));
        }
        if let Some(on) = frame.load_output() {
            obs.push((field::VE_LOAD, Value::Bool(on)));
        }
        if let Some(a) = frame.load_current() {
            obs.push((field::VE_LOAD_CURRENT, Value::Float(a)));
        }
        if let Some(wh) = frame.yield_total() {
            obs.push((field::VE_YIELD_TOTAL, Value::Float(wh)));
        }
        if let Some(wh) = frame.yield_today() {
            obs.push((field::VE_YIELD_TODAY, Value::Float(wh)));
        }
        if let Some(wh) = frame.yield_yesterday() {
            obs.push((field::VE_YIELD_YESTERDAY, Value::Float(wh)));
        }
        if let Some(w) = frame.max_power_today() {
            obs.push((field::VE_MAX_POWER_TODAY, Value::Float(w)));
        }
        if let Some(w) = frame.max_power_yesterday() {
            obs.push((field::VE_MAX_POWER_YESTERDAY, Value::Float(w)));
        }
        if let Some(day) = frame.day_sequence() {
            obs.push((field::VE_DAY_SEQ_NUM, Value::Int(day)));
        }

        Ok(obs)
    }
}

/// Open the serial port for the configured charge controller.
///
/// The port timeout is kept short so the frame deadline, not the transport,
/// governs how long a poll can stall.
pub fn open(
    config: &SolarConfig,
) -> Result<SolarCharger<Box<dyn serialport::SerialPort>>, SensorError> {
    let port = serialport::new(&config.port, config.baud)
        .timeout(Duration::from_millis(250))
        .open()
        .map_err(|e| SensorError::Serial(e.to_string()))?;
    let reader = VeDirectReader::new(port, Duration::from_millis(config.timeout_ms));
    Ok(SolarCharger::new(reader))
}
