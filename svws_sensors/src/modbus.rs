//! Modbus RTU master for the RS-485 sensor buses.
//!
//! The station's wind and rain instruments are register devices speaking
//! function codes 0x03 (read holding registers) and 0x06 (write single
//! register) only, so this master implements exactly those. Frames are
//! `unit, function, payload, CRC-16/MODBUS` with the CRC transmitted
//! low-byte first.
//!
//! The master is generic over the transport so the framing and transaction
//! logic is testable against an in-memory port; production uses a
//! `serialport` handle. Two instruments share one tty on the reference
//! hardware, so buses are handed out as `Arc<Mutex<SerialBus>>`.

use crc16::{MODBUS, State};
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;
use svws_common::config::BusConfig;
use svws_common::instrument::SensorError;
use svws_common::units;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// A Modbus bus over a real serial port.
pub type SerialBus = ModbusRtu<Box<dyn serialport::SerialPort>>;

/// Drives an RS-485 transmit-enable line around request transmission.
///
/// Only needed for transceivers without automatic direction control: the
/// line is raised for the duration of the request bytes and dropped again
/// to receive the response.
pub trait TxEnable {
    fn set_transmit(&mut self, enabled: bool) -> Result<(), SensorError>;
}

/// Transmit-enable line on a GPIO pin.
pub struct GpioTxEnable {
    pin: rppal::gpio::OutputPin,
}

impl GpioTxEnable {
    /// Claim the given BCM pin, initially in receive (low) state.
    pub fn new(bcm_pin: u8) -> Result<Self, SensorError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| SensorError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| SensorError::Gpio(e.to_string()))?
            .into_output_low();
        Ok(Self { pin })
    }
}

impl TxEnable for GpioTxEnable {
    fn set_transmit(&mut self, enabled: bool) -> Result<(), SensorError> {
        if enabled {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

/// Minimal Modbus RTU master.
pub struct ModbusRtu<T> {
    transport: T,
    settle: Duration,
    txden: Option<Box<dyn TxEnable>>,
}

impl<T: Read + Write> ModbusRtu<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            settle: Duration::ZERO,
            txden: None,
        }
    }

    /// Transceiver turnaround delay applied before each transaction.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_txden(mut self, txden: Box<dyn TxEnable>) -> Self {
        self.txden = Some(txden);
        self
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Read one holding register (function 0x03, quantity 1).
    pub fn read_holding_register(&mut self, unit: u8, addr: u16) -> Result<u16, SensorError> {
        let addr = addr.to_be_bytes();
        let payload = self.transact(unit, READ_HOLDING_REGISTERS, &[addr[0], addr[1], 0x00, 0x01])?;
        if payload.len() != 3 || payload[0] != 2 {
            return Err(SensorError::Frame(format!(
                "unexpected read response length {}",
                payload.len()
            )));
        }
        Ok(u16::from_be_bytes([payload[1], payload[2]]))
    }

    /// Read a register holding a value in tenths (the scaling both the wind
    /// sensors and the rain gauge use).
    pub fn read_register_tenths(&mut self, unit: u8, addr: u16) -> Result<f64, SensorError> {
        Ok(units::tenths(self.read_holding_register(unit, addr)?))
    }

    /// Write one register (function 0x06) and verify the echo.
    pub fn write_single_register(
        &mut self,
        unit: u8,
        addr: u16,
        value: u16,
    ) -> Result<(), SensorError> {
        let addr = addr.to_be_bytes();
        let value = value.to_be_bytes();
        let request = [addr[0], addr[1], value[0], value[1]];
        let echo = self.transact(unit, WRITE_SINGLE_REGISTER, &request)?;
        if echo != request {
            return Err(SensorError::InvalidResponse(format!(
                "write echo mismatch: {echo:02x?}"
            )));
        }
        Ok(())
    }

    /// Run one request/response transaction and return the response payload
    /// (everything between the function byte and the CRC).
    fn transact(&mut self, unit: u8, function: u8, data: &[u8]) -> Result<Vec<u8>, SensorError> {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        let request = build_frame(unit, function, data);
        if let Some(txden) = &mut self.txden {
            txden.set_transmit(true)?;
        }
        let sent = self
            .transport
            .write_all(&request)
            .and_then(|()| self.transport.flush());
        if let Some(txden) = &mut self.txden {
            txden.set_transmit(false)?;
        }
        sent?;

        self.read_response(unit, function)
    }

    fn read_response(&mut self, unit: u8, function: u8) -> Result<Vec<u8>, SensorError> {
        let mut head = [0u8; 3];
        self.read_exact(&mut head)?;

        if head[0] != unit {
            return Err(SensorError::Frame(format!(
                "response from unit {}, expected {}",
                head[0], unit
            )));
        }

        if head[1] == function | 0x80 {
            // Exception frame: unit, fc|0x80, code, CRC.
            let mut crc = [0u8; 2];
            self.read_exact(&mut crc)?;
            verify_crc(&[head[0], head[1], head[2], crc[0], crc[1]])?;
            return Err(SensorError::ModbusException {
                function,
                code: head[2],
            });
        }

        if head[1] != function {
            return Err(SensorError::Frame(format!(
                "response function {:#04x}, expected {function:#04x}",
                head[1]
            )));
        }

        let remaining = match function {
            READ_HOLDING_REGISTERS => usize::from(head[2]) + 2,
            WRITE_SINGLE_REGISTER => 5,
            _ => {
                return Err(SensorError::Frame(format!(
                    "unsupported function {function:#04x}"
                )));
            }
        };

        let mut frame = head.to_vec();
        frame.resize(3 + remaining, 0);
        self.read_exact(&mut frame[3..])?;
        verify_crc(&frame)?;

        Ok(frame[2..frame.len() - 2].to_vec())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SensorError> {
        self.transport.read_exact(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SensorError::Timeout,
            std::io::ErrorKind::UnexpectedEof => SensorError::Frame("short response".to_string()),
            _ => SensorError::Io(e),
        })
    }
}

/// Open the serial port for a configured bus.
pub fn open(config: &BusConfig) -> Result<SerialBus, SensorError> {
    let port = serialport::new(&config.port, config.baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(Duration::from_millis(config.timeout_ms))
        .open()
        .map_err(|e| SensorError::Serial(e.to_string()))?;

    let mut bus = ModbusRtu::new(port).with_settle(Duration::from_millis(config.settle_ms));
    if let Some(pin) = config.txden_pin {
        bus = bus.with_txden(Box::new(GpioTxEnable::new(pin)?));
    }
    Ok(bus)
}

/// Build a complete RTU frame: unit, function, data, CRC (low byte first).
pub fn build_frame(unit: u8, function: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + data.len());
    frame.push(unit);
    frame.push(function);
    frame.extend_from_slice(data);
    let crc = State::<MODBUS>::calculate(&frame).to_le_bytes();
    frame.extend_from_slice(&crc);
    frame
}

fn verify_crc(frame: &[u8]) -> Result<(), SensorError> {
    let (body, crc) = frame.split_at(frame.len() - 2);
    if State::<MODBUS>::calculate(body).to_le_bytes() != crc {
        return Err(SensorError::Checksum);
    }
    Ok(())
}
