//! Battery management system client.
//!
//! The BMS speaks a framed request/response protocol over UART. Every frame
//! is 13 bytes: `0xA5, address, command, 0x08, payload[8], checksum`, the
//! checksum being the low byte of the sum of the preceding twelve bytes.
//! Multi-record answers (cell voltages, temperature probes) arrive as a
//! sequence of frames for the same command, each carrying a 1-based record
//! number in its first payload byte.

use std::io::{Read, Write};
use std::time::Duration;
use svws_common::config::BmsConfig;
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use svws_common::units;

const START: u8 = 0xA5;
const FRAME_LEN: usize = 13;
const PAYLOAD_LEN: u8 = 0x08;

mod command {
    /// Pack voltage / current / state of charge.
    pub const PACK_MEASUREMENTS: u8 = 0x90;
    /// Cell count, probe count, charger/load state, cycle count.
    pub const STATUS: u8 = 0x94;
    /// Per-cell voltages, three cells per frame.
    pub const CELL_VOLTAGES: u8 = 0x95;
    /// Temperature probes, seven per frame.
    pub const TEMPERATURES: u8 = 0x96;
}

/// One full reading set from the battery.
#[derive(Debug, Clone, PartialEq)]
pub struct BmsSnapshot {
    /// Pack voltage in volts.
    pub voltage: f64,
    /// Pack current in amps, negative while discharging.
    pub current: f64,
    /// State of charge in percent.
    pub soc: f64,
    /// Charge/discharge cycle count.
    pub cycles: u16,
    pub charger_running: bool,
    pub load_running: bool,
    /// Per-cell voltages in volts, cell 1 first.
    pub cell_voltages: Vec<f64>,
    /// Probe temperatures in Celsius.
    pub temperatures: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Status {
    cells: u8,
    temperature_sensors: u8,
    charger_running: bool,
    load_running: bool,
    cycles: u16,
}

pub struct BmsClient<T> {
    transport: T,
    address: u8,
}

impl<T: Read + Write> BmsClient<T> {
    pub fn new(transport: T, address: u8) -> Self {
        Self { transport, address }
    }

    /// Read everything the station consumes in one pass.
    pub fn snapshot(&mut self) -> Result<BmsSnapshot, SensorError> {
        let pack = self.exchange(command::PACK_MEASUREMENTS)?;
        let voltage = f64::from(u16::from_be_bytes([pack[0], pack[1]])) / 10.0;
        // pack[2..4] is the acquisition-board voltage, unused here.
        let current = (f64::from(u16::from_be_bytes([pack[4], pack[5]])) - 30000.0) / 10.0;
        let soc = f64::from(u16::from_be_bytes([pack[6], pack[7]])) / 10.0;

        let status = self.status()?;
        let cell_voltages = self.cell_voltages(status.cells)?;
        let temperatures = self.temperatures(status.temperature_sensors)?;

        Ok(BmsSnapshot {
            voltage,
            current,
            soc,
            cycles: status.cycles,
            charger_running: status.charger_running,
            load_running: status.load_running,
            cell_voltages,
            temperatures,
        })
    }

    fn status(&mut self) -> Result<Status, SensorError> {
        let d = self.exchange(command::STATUS)?;
        Ok(Status {
            cells: d[0],
            temperature_sensors: d[1],
            charger_running: d[2] != 0,
            load_running: d[3] != 0,
            // d[4] carries DI/DO states, unused here.
            cycles: u16::from_be_bytes([d[5], d[6]]),
        })
    }

    fn cell_voltages(&mut self, cells: u8) -> Result<Vec<f64>, SensorError> {
        if cells == 0 {
            return Ok(Vec::new());
        }
        let records = usize::from(cells).div_ceil(3);
        let mut volts: Vec<Option<f64>> = vec![None; usize::from(cells)];

        self.send(command::CELL_VOLTAGES)?;
        for _ in 0..records {
            let d = self.read_reply(command::CELL_VOLTAGES)?;
            let record = usize::from(d[0]);
            if record == 0 || record > records {
                return Err(SensorError::Frame(format!(
                    "unexpected cell voltage record {record}"
                )));
            }
            for slot in 0..3 {
                let idx = (record - 1) * 3 + slot;
                if idx >= volts.len() {
                    break;
                }
                let mv = u16::from_be_bytes([d[1 + slot * 2], d[2 + slot * 2]]);
                volts[idx] = Some(units::mv_to_v(f64::from(mv)));
            }
        }

        volts
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SensorError::Frame("incomplete cell voltage table".to_string()))
    }

    fn temperatures(&mut self, sensors: u8) -> Result<Vec<f64>, SensorError> {
        if sensors == 0 {
            return Ok(Vec::new());
        }
        let records = usize::from(sensors).div_ceil(7);
        let mut temps: Vec<Option<f64>> = vec![None; usize::from(sensors)];

        self.send(command::TEMPERATURES)?;
        for _ in 0..records {
            let d = self.read_reply(command::TEMPERATURES)?;
            let record = usize::from(d[0]);
            if record == 0 || record > records {
                return Err(SensorError::Frame(format!(
                    "unexpected temperature record {record}"
                )));
            }
            for slot in 0..7 {
                let idx = (record - 1) * 7 + slot;
                if idx >= temps.len() {
                    break;
                }
                // Probes report with a +40 offset.
                temps[idx] = Some(f64::from(d[1 + slot]) - 40.0);
            }
        }

        temps
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SensorError::Frame("incomplete temperature table".to_string()))
    }

    fn exchange(&mut self, cmd: u8) -> Result<[u8; 8], SensorError> {
        self.send(cmd)?;
        self.read_reply(cmd)
    }

    fn send(&mut self, cmd: u8) -> Result<(), SensorError> {
        let frame = build_request(self.address, cmd);
        self.transport.write_all(&frame)?;
        self.transport.flush()?;
        Ok(())
    }

    fn read_reply(&mut self, cmd: u8) -> Result<[u8; 8], SensorError> {
        let mut frame = [0u8; FRAME_LEN];
        self.transport
            .read_exact(&mut frame)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    SensorError::Timeout
                }
                std::io::ErrorKind::UnexpectedEof => {
                    SensorError::Frame("short response".to_string())
                }
                _ => SensorError::Io(e),
            })?;
        parse_reply(&frame, cmd)
    }
}

impl<T: Read + Write> Instrument for BmsClient<T> {
    fn label(&self) -> &str {
        "bms"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let snapshot = self.snapshot()?;

        let mut obs: Vec<Observation> = vec![
            (field::BMS_VOLTAGE, Value::Float(snapshot.voltage)),
            (field::BMS_CYCLES, Value::Int(i64::from(snapshot.cycles))),
        ];
        for (name, volts) in field::BMS_CELL_VOLTAGES.into_iter().zip(&snapshot.cell_voltages) {
            obs.push((name, Value::Float(*volts)));
        }
        if let Some(celsius) = snapshot.temperatures.first() {
            obs.push((field::BMS_TEMP, Value::Float(units::c_to_f(*celsius))));
        }
        Ok(obs)
    }
}

/// Open the serial port for the configured BMS.
pub fn open(config: &BmsConfig) -> Result<BmsClient<Box<dyn serialport::SerialPort>>, SensorError> {
    let port = serialport::new(&config.port, config.baud)
        .timeout(Duration::from_millis(config.timeout_ms))
        .open()
        .map_err(|e| SensorError::Serial(e.to_string()))?;
    Ok(BmsClient::new(port, config.address))
}

pub(crate) fn build_request(address: u8, cmd: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START;
    frame[1] = address;
    frame[2] = cmd;
    frame[3] = PAYLOAD_LEN;
    frame[12] = checksum(&frame[..12]);
    frame
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn parse_reply(frame: &[u8; FRAME_LEN], cmd: u8) -> Result<[u8; 8], SensorError> {
    if frame[0] != START {
        return Err(SensorError::Frame(format!(
            "bad start byte {:#04x}",
            frame[0]
        )));
    }
    if frame[3] != PAYLOAD_LEN {
        return Err(SensorError::Frame(format!(
            "bad payload length {:#04x}",
            frame[3]
        )));
    }
    if checksum(&frame[..12]) != frame[12] {
        return Err(SensorError::Checksum);
    }
    if frame[2] != cmd {
        return Err(SensorError::Frame(format!(
            "reply for command {:#04x}, expected {cmd:#04x}",
            frame[2]
        )));
    }
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&frame[4..12]);
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPort;

    /// Build a well-formed reply frame the way the BMS would.
    fn reply(cmd: u8, payload: [u8; 8]) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = START;
        frame[1] = 0x01; // the BMS answers from address 1
        frame[2] = cmd;
        frame[3] = PAYLOAD_LEN;
        frame[4..12].copy_from_slice(&payload);
        frame[12] = checksum(&frame[..12]);
        frame
    }

    #[test]
    fn request_frame_checksum() {
        let frame = build_request(0x40, 0x90);
        assert_eq!(
            frame,
            [0xA5, 0x40, 0x90, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0x7D]
        );
    }

    #[test]
    fn reply_parsing_rejects_corruption() {
        let good = reply(0x90, [0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(parse_reply(&good, 0x90).is_ok());

        let mut bad_start = good;
        bad_start[0] = 0xA6;
        assert!(matches!(
            parse_reply(&bad_start, 0x90),
            Err(SensorError::Frame(_))
        ));

        let mut bad_sum = good;
        bad_sum[7] ^= 0x01;
        assert!(matches!(
            parse_reply(&bad_sum, 0x90),
            Err(SensorError::Checksum)
        ));

        assert!(matches!(
            parse_reply(&good, 0x94),
            Err(SensorError::Frame(_))
        ));
    }

    #[test]
    fn snapshot_decodes_a_four_cell_pack() {
        let mut port = MockPort::new();
        // 13.2 V pack, 2.5 A charging, 84.5% SOC.
        let pack = reply(
            command::PACK_MEASUREMENTS,
            [0x00, 0x84, 0x00, 0x00, 0x75, 0x49, 0x03, 0x4D],
        );
        // 4 cells, 1 probe, charger on, load off, 57 cycles.
        let status = reply(command::STATUS, [4, 1, 1, 0, 0, 0x00, 0x39, 0]);
        // Cells 1-3 then cell 4: 3312 mV, 3301 mV, 3298 mV, 3305 mV.
        let cells_1 = reply(
            command::CELL_VOLTAGES,
            [1, 0x0C, 0xF0, 0x0C, 0xE5, 0x0C, 0xE2, 0],
        );
        let cells_2 = reply(command::CELL_VOLTAGES, [2, 0x0C, 0xE9, 0, 0, 0, 0, 0]);
        // One probe at 25 C (raw 65).
        let temps = reply(command::TEMPERATURES, [1, 65, 0, 0, 0, 0, 0, 0]);

        for frame in [pack, status, cells_1, cells_2, temps] {
            port.respond(&frame);
        }

        let mut client = BmsClient::new(port, 0x08);
        let snapshot = client.snapshot().unwrap();

        assert_eq!(snapshot.voltage, 13.2);
        assert_eq!(snapshot.current, 2.5);
        assert_eq!(snapshot.soc, 84.5);
        assert_eq!(snapshot.cycles, 57);
        assert!(snapshot.charger_running);
        assert!(!snapshot.load_running);
        assert_eq!(snapshot.cell_voltages, vec![3.312, 3.301, 3.298, 3.305]);
        assert_eq!(snapshot.temperatures, vec![25.0]);
    }

    #[test]
    fn records_are_placed_by_number_not_arrival_order() {
        let mut port = MockPort::new();
        let pack = reply(command::PACK_MEASUREMENTS, [0, 0, 0, 0, 0x75, 0x30, 0, 0]);
        let status = reply(command::STATUS, [4, 0, 0, 0, 0, 0, 0, 0]);
        // Second record arrives first.
        let cells_2 = reply(command::CELL_VOLTAGES, [2, 0x0C, 0xE9, 0, 0, 0, 0, 0]);
        let cells_1 = reply(
            command::CELL_VOLTAGES,
            [1, 0x0C, 0xF0, 0x0C, 0xE5, 0x0C, 0xE2, 0],
        );

        for frame in [pack, status, cells_2, cells_1] {
            port.respond(&frame);
        }

        let mut client = BmsClient::new(port, 0x08);
        let snapshot = client.snapshot().unwrap();
        assert_eq!(snapshot.cell_voltages, vec![3.312, 3.301, 3.298, 3.305]);
    }

    #[test]
    fn missing_cell_record_is_an_error() {
        let mut port = MockPort::new();
        let pack = reply(command::PACK_MEASUREMENTS, [0, 0, 0, 0, 0x75, 0x30, 0, 0]);
        let status = reply(command::STATUS, [4, 0, 0, 0, 0, 0, 0, 0]);
        // Record 1 twice; record 2 never arrives.
        let cells_1 = reply(
            command::CELL_VOLTAGES,
            [1, 0x0C, 0xF0, 0x0C, 0xE5, 0x0C, 0xE2, 0],
        );

        for frame in [pack, status, cells_1, cells_1] {
            port.respond(&frame);
        }

        let mut client = BmsClient::new(port, 0x08);
        assert!(matches!(client.snapshot(), Err(SensorError::Frame(_))));
    }

    #[test]
    fn observation_mapping_is_capped_at_four_cells() {
        let mut port = MockPort::new();
        let pack = reply(
            command::PACK_MEASUREMENTS,
            [0x00, 0x84, 0x00, 0x00, 0x75, 0x30, 0x03, 0x4D],
        );
        // A five-cell pack still maps onto the host's four cell fields.
        let status = reply(command::STATUS, [5, 1, 0, 0, 0, 0x00, 0x39, 0]);
        let cells_1 = reply(
            command::CELL_VOLTAGES,
            [1, 0x0C, 0xF0, 0x0C, 0xE5, 0x0C, 0xE2, 0],
        );
        let cells_2 = reply(
            command::CELL_VOLTAGES,
            [2, 0x0C, 0xE9, 0x0C, 0xEE, 0, 0, 0],
        );
        let temps = reply(command::TEMPERATURES, [1, 65, 0, 0, 0, 0, 0, 0]);

        for frame in [pack, status, cells_1, cells_2, temps] {
            port.respond(&frame);
        }

        let mut client = BmsClient::new(port, 0x08);
        let obs = client.observe().unwrap();

        assert_eq!(obs[0], (field::BMS_VOLTAGE, Value::Float(13.2)));
        assert_eq!(obs[1], (field::BMS_CYCLES, Value::Int(57)));
        assert_eq!(obs[2], (field::BMS_CELL_VOLTAGES[0], Value::Float(3.312)));
        assert_eq!(obs[5], (field::BMS_CELL_VOLTAGES[3], Value::Float(3.305)));
        // 25 C probe reported in Fahrenheit; the fifth cell has no field.
        assert_eq!(obs[6], (field::BMS_TEMP, Value::Float(77.0)));
        assert_eq!(obs.len(), 7);
    }
}
