//! DHT22 humidity/temperature sensor.
//!
//! Single-wire protocol on a GPIO pin: the host drives the line low for a
//! few milliseconds, releases it, and the sensor answers with a preamble
//! followed by 40 bits. Each bit is a ~50 µs low phase and a high phase
//! whose width encodes the value (~26 µs for 0, ~70 µs for 1). The payload
//! is humidity x10, temperature x10 (sign in the top bit) and a one-byte
//! checksum.
//!
//! Pulse capture is isolated behind [`PulseSource`] so the decode logic and
//! the retry policy run against scripted pulses in tests; the hardware
//! source bit-bangs the pin. The DHT family routinely fails reads, so one
//! observation is allowed several attempts.

use rppal::gpio::{Gpio, IoPin, Mode};
use std::thread;
use std::time::{Duration, Instant};
use svws_common::config::DhtConfig;
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use svws_common::units;
use tracing::debug;

/// High phases at least this wide decode as a 1 bit.
const BIT_THRESHOLD: Duration = Duration::from_micros(50);

/// Minimum sensor recovery time between read attempts.
const RETRY_HOLDOFF: Duration = Duration::from_secs(2);

/// One successful sensor read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

/// Produces the 40 high-phase pulse widths of one sensor response.
pub trait PulseSource {
    fn read_pulses(&mut self) -> Result<[Duration; 40], SensorError>;
}

/// Hardware pulse source bit-banging a GPIO pin.
pub struct GpioPulseSource {
    pin: IoPin,
}

impl GpioPulseSource {
    /// Claim the given BCM pin. The line idles high (the sensor side has a
    /// pull-up).
    pub fn new(bcm_pin: u8) -> Result<Self, SensorError> {
        let gpio = Gpio::new().map_err(|e| SensorError::Gpio(e.to_string()))?;
        let mut pin = gpio
            .get(bcm_pin)
            .map_err(|e| SensorError::Gpio(e.to_string()))?
            .into_io(Mode::Output);
        pin.set_high();
        Ok(Self { pin })
    }

    fn wait_level(&self, high: bool, deadline: Instant) -> Result<(), SensorError> {
        while self.pin.is_high() != high {
            if Instant::now() > deadline {
                return Err(SensorError::Timeout);
            }
            std::hint::spin_loop();
        }
        Ok(())
    }
}

impl PulseSource for GpioPulseSource {
    fn read_pulses(&mut self) -> Result<[Duration; 40], SensorError> {
        // Handshake: hold the line low, then release it to the sensor.
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        thread::sleep(Duration::from_millis(3));
        self.pin.set_high();
        self.pin.set_mode(Mode::Input);

        let deadline = Instant::now() + Duration::from_millis(10);

        // Preamble: the sensor pulls low ~80 us, high ~80 us, then starts
        // the first bit's low phase.
        self.wait_level(false, deadline)?;
        self.wait_level(true, deadline)?;
        self.wait_level(false, deadline)?;

        let mut pulses = [Duration::ZERO; 40];
        for pulse in pulses.iter_mut() {
            self.wait_level(true, deadline)?;
            let start = Instant::now();
            self.wait_level(false, deadline)?;
            *pulse = start.elapsed();
        }

        // Leave the line driven high for the idle period.
        self.pin.set_mode(Mode::Output);
        self.pin.set_high();

        Ok(pulses)
    }
}

/// Decode 40 pulse widths into a reading.
pub(crate) fn decode(pulses: &[Duration; 40]) -> Result<Reading, SensorError> {
    let mut bytes = [0u8; 5];
    for (i, pulse) in pulses.iter().enumerate() {
        if *pulse >= BIT_THRESHOLD {
            bytes[i / 8] |= 1 << (7 - i % 8);
        }
    }

    let expected = bytes[0]
        .wrapping_add(bytes[1])
        .wrapping_add(bytes[2])
        .wrapping_add(bytes[3]);
    if expected != bytes[4] {
        return Err(SensorError::Checksum);
    }

    let humidity = units::tenths(u16::from_be_bytes([bytes[0], bytes[1]]));
    let raw_temp = u16::from_be_bytes([bytes[2], bytes[3]]);
    let magnitude = units::tenths(raw_temp & 0x7FFF);
    let temperature = if raw_temp & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    };

    if !(0.0..=100.0).contains(&humidity) {
        return Err(SensorError::InvalidResponse(format!(
            "humidity {humidity} out of range"
        )));
    }

    Ok(Reading {
        temperature,
        humidity,
    })
}

/// DHT22 sensor with a bounded per-cycle retry policy.
pub struct Dht22<S> {
    source: S,
    tries: u32,
    holdoff: Duration,
}

impl<S: PulseSource> Dht22<S> {
    pub fn new(source: S, tries: u32) -> Self {
        Self {
            source,
            tries,
            holdoff: RETRY_HOLDOFF,
        }
    }

    /// Override the recovery holdoff between attempts.
    pub fn with_holdoff(mut self, holdoff: Duration) -> Self {
        self.holdoff = holdoff;
        self
    }

    /// Take one reading, retrying failed attempts up to the configured
    /// bound with the sensor's recovery holdoff in between.
    pub fn read(&mut self) -> Result<Reading, SensorError> {
        let mut last = SensorError::NotReady;
        for attempt in 1..=self.tries {
            match self.source.read_pulses().and_then(|p| decode(&p)) {
                Ok(reading) => return Ok(reading),
                Err(err) => {
                    debug!("DHT22 attempt {attempt}/{} failed: {err}", self.tries);
                    last = err;
                    if attempt < self.tries && !self.holdoff.is_zero() {
                        thread::sleep(self.holdoff);
                    }
                }
            }
        }
        Err(last)
    }
}

impl<S: PulseSource> Instrument for Dht22<S> {
    fn label(&self) -> &str {
        "dht22"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let reading = self.read()?;
        Ok(vec![
            (field::OUT_TEMP, Value::Float(units::c_to_f(reading.temperature))),
            (field::OUT_HUMIDITY, Value::Float(reading.humidity)),
        ])
    }
}

/// Claim the configured pin.
pub fn open(config: &DhtConfig) -> Result<Dht22<GpioPulseSource>, SensorError> {
    Ok(Dht22::new(GpioPulseSource::new(config.pin)?, config.tries))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: Duration = Duration::from_micros(70);
    const ZERO: Duration = Duration::from_micros(26);

    fn pulses_from_bytes(bytes: [u8; 5]) -> [Duration; 40] {
        let mut pulses = [ZERO; 40];
        for (i, pulse) in pulses.iter_mut().enumerate() {
            if bytes[i / 8] & (1 << (7 - i % 8)) != 0 {
                *pulse = ONE;
            }
        }
        pulses
    }

    fn with_checksum(mut bytes: [u8; 5]) -> [u8; 5] {
        bytes[4] = bytes[0]
            .wrapping_add(bytes[1])
            .wrapping_add(bytes[2])
            .wrapping_add(bytes[3]);
        bytes
    }

    /// Scripted pulse source: a queue of attempts.
    struct ScriptedSource {
        attempts: Vec<Result<[Duration; 40], SensorError>>,
        reads: usize,
    }

    impl ScriptedSource {
        fn new(attempts: Vec<Result<[Duration; 40], SensorError>>) -> Self {
            Self { attempts, reads: 0 }
        }
    }

    impl PulseSource for ScriptedSource {
        fn read_pulses(&mut self) -> Result<[Duration; 40], SensorError> {
            self.reads += 1;
            if self.attempts.is_empty() {
                Err(SensorError::Timeout)
            } else {
                self.attempts.remove(0)
            }
        }
    }

    #[test]
    fn decodes_positive_reading() {
        // 65.2 %RH, 26.3 C
        let pulses = pulses_from_bytes(with_checksum([0x02, 0x8C, 0x01, 0x07, 0]));
        let reading = decode(&pulses).unwrap();
        assert_eq!(reading.humidity, 65.2);
        assert_eq!(reading.temperature, 26.3);
    }

    #[test]
    fn decodes_negative_temperature() {
        // 65.2 %RH, -10.1 C (sign bit set)
        let pulses = pulses_from_bytes(with_checksum([0x02, 0x8C, 0x80, 0x65, 0]));
        let reading = decode(&pulses).unwrap();
        assert_eq!(reading.temperature, -10.1);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut bytes = with_checksum([0x02, 0x8C, 0x01, 0x07, 0]);
        bytes[4] ^= 0x01;
        assert!(matches!(
            decode(&pulses_from_bytes(bytes)),
            Err(SensorError::Checksum)
        ));
    }

    #[test]
    fn out_of_range_humidity_is_rejected() {
        // 1023.9 %RH would be a bus glitch that still checksums.
        let pulses = pulses_from_bytes(with_checksum([0x27, 0xFF, 0x01, 0x07, 0]));
        assert!(matches!(
            decode(&pulses),
            Err(SensorError::InvalidResponse(_))
        ));
    }

    #[test]
    fn retries_until_a_good_read() {
        let good = pulses_from_bytes(with_checksum([0x02, 0x8C, 0x01, 0x07, 0]));
        let source = ScriptedSource::new(vec![Err(SensorError::Timeout), Ok(good)]);

        let mut dht = Dht22::new(source, 4).with_holdoff(Duration::ZERO);
        let reading = dht.read().unwrap();
        assert_eq!(reading.humidity, 65.2);
        assert_eq!(dht.source.reads, 2);
    }

    #[test]
    fn gives_up_after_the_configured_tries() {
        let source = ScriptedSource::new(vec![]);
        let mut dht = Dht22::new(source, 2).with_holdoff(Duration::ZERO);

        assert!(matches!(dht.read(), Err(SensorError::Timeout)));
        assert_eq!(dht.source.reads, 2);
    }

    #[test]
    fn observation_mapping_is_fahrenheit() {
        let good = pulses_from_bytes(with_checksum([0x02, 0x8C, 0x01, 0x07, 0]));
        let mut dht = Dht22::new(ScriptedSource::new(vec![Ok(good)]), 1);

        let obs = dht.observe().unwrap();
        let (name, value) = obs[0];
        assert_eq!(name, field::OUT_TEMP);
        let Value::Float(f) = value else {
            panic!("expected float, got {value:?}");
        };
        // 26.3 C is 79.34 F
        assert!((f - 79.34).abs() < 1e-9);
        assert_eq!(obs[1], (field::OUT_HUMIDITY, Value::Float(65.2)));
    }
}
