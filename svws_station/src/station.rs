//! Station assembly and the polling loop.
//!
//! A `Station` owns one instrument per configured sensor table and polls
//! them in a fixed order each cycle. A failing instrument logs a warning and
//! contributes nothing; the packet is emitted regardless. The only
//! invariant a packet guarantees is that every present field holds a
//! convertible value.

use crate::emit::PacketEmitter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use svws_common::config::{BusId, BusConfig, ConfigError, StationConfig};
use svws_common::instrument::{Instrument, SensorError};
use svws_common::record::LoopPacket;
use svws_sensors::modbus::{self, SerialBus};
use svws_sensors::{bms, dht22, onewire, rain, vedirect, wind};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the inter-packet sleep rechecks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

type SharedBus = Arc<Mutex<SerialBus>>;

#[derive(Debug, Error)]
pub enum StationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        source: SensorError,
    },

    #[error("failed to emit packet: {0}")]
    Emit(#[from] std::io::Error),
}

impl StationError {
    fn open(device: &str, source: SensorError) -> Self {
        Self::Open {
            device: device.to_string(),
            source,
        }
    }
}

pub struct Station {
    instruments: Vec<Box<dyn Instrument>>,
    interval: Duration,
}

impl Station {
    /// Assemble a station from an explicit instrument list.
    ///
    /// Instruments are polled in the given order each cycle.
    pub fn with_instruments(instruments: Vec<Box<dyn Instrument>>, interval: Duration) -> Self {
        Self {
            instruments,
            interval,
        }
    }

    /// Build the station from configuration, opening only what is declared.
    pub fn from_config(config: &StationConfig) -> Result<Self, StationError> {
        config.validate()?;

        let rs485 = open_bus(config.rs485.as_ref(), "rs485")?;
        let rs485_aux = open_bus(config.rs485_aux.as_ref(), "rs485_aux")?;

        // Poll order matches the reference station: DHT22, rain, wind
        // direction, wind speed, enclosure, soil ladder, BMS, solar.
        let mut instruments: Vec<Box<dyn Instrument>> = Vec::new();

        if let Some(cfg) = &config.dht22 {
            let dht = dht22::open(cfg).map_err(|e| StationError::open("dht22", e))?;
            instruments.push(Box::new(dht));
        }

        if let Some(cfg) = &config.rain {
            let bus = select_bus(&rs485, &rs485_aux, cfg.bus, "rain")?;
            instruments.push(Box::new(rain::RainGauge::new(bus, cfg.address)));
        }

        if let Some(cfg) = &config.wind_direction {
            let bus = select_bus(&rs485, &rs485_aux, cfg.bus, "wind_direction")?;
            instruments.push(Box::new(wind::WindVane::new(bus, cfg.address)));
        }

        if let Some(cfg) = &config.wind_speed {
            let bus = select_bus(&rs485, &rs485_aux, cfg.bus, "wind_speed")?;
            instruments.push(Box::new(wind::Anemometer::new(bus, cfg.address)));
        }

        if let Some(cfg) = &config.onewire {
            if let Some(id) = &cfg.enclosure_id {
                let probe = onewire::W1Probe::new(&cfg.devices_dir, id);
                instruments.push(Box::new(onewire::EnclosureProbe::new(probe)));
            }
            if let Some(ids) = cfg.soil_ids() {
                instruments.push(Box::new(onewire::SoilLadder::from_ids(
                    &cfg.devices_dir,
                    ids,
                )));
            }
        }

        if let Some(cfg) = &config.bms {
            let client = bms::open(cfg).map_err(|e| StationError::open("bms", e))?;
            instruments.push(Box::new(client));
        }

        if let Some(cfg) = &config.solar {
            let charger = vedirect::open(cfg).map_err(|e| StationError::open("solar", e))?;
            instruments.push(Box::new(charger));
        }

        info!("station assembled with {} instruments", instruments.len());

        Ok(Self::with_instruments(
            instruments,
            Duration::from_secs_f64(config.station.loop_interval_secs),
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll every instrument once and assemble the packet.
    pub fn poll_once(&mut self) -> LoopPacket {
        let mut packet = LoopPacket::new(unix_now());
        for instrument in &mut self.instruments {
            match instrument.observe() {
                Ok(observations) => packet.extend(observations),
                Err(err) => warn!(instrument = instrument.label(), "read failed: {err}"),
            }
        }
        packet
    }

    /// Poll and emit until the shutdown flag clears.
    ///
    /// Poll duration is deducted from the loop interval; a cycle that
    /// overruns it continues immediately.
    pub fn run(
        &mut self,
        emitter: &mut dyn PacketEmitter,
        running: &AtomicBool,
    ) -> Result<(), StationError> {
        while running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();

            let packet = self.poll_once();
            emitter.emit(&packet)?;
            debug!(fields = packet.len(), "loop packet emitted");

            let elapsed = cycle_start.elapsed();
            let mut remaining = match self.interval.checked_sub(elapsed) {
                Some(remaining) => remaining,
                None => {
                    debug!("poll cycle overran the loop interval ({elapsed:?})");
                    Duration::ZERO
                }
            };
            while !remaining.is_zero() && running.load(Ordering::SeqCst) {
                let chunk = remaining.min(SHUTDOWN_POLL);
                thread::sleep(chunk);
                remaining -= chunk;
            }
        }
        Ok(())
    }
}

/// Packet timestamp: Unix seconds, rounded to nearest.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64().round() as u64)
        .unwrap_or_default()
}

fn open_bus(config: Option<&BusConfig>, name: &str) -> Result<Option<SharedBus>, StationError> {
    match config {
        Some(cfg) => {
            let bus = modbus::open(cfg).map_err(|e| StationError::open(name, e))?;
            info!("{name}: opened {} at {} baud", cfg.port, cfg.baud);
            Ok(Some(Arc::new(Mutex::new(bus))))
        }
        None => Ok(None),
    }
}

fn select_bus(
    rs485: &Option<SharedBus>,
    rs485_aux: &Option<SharedBus>,
    id: BusId,
    device: &str,
) -> Result<SharedBus, StationError> {
    let bus = match id {
        BusId::Rs485 => rs485.clone(),
        BusId::Rs485Aux => rs485_aux.clone(),
    };
    // validate() already rejects this; kept as a hard stop for callers that
    // skip validation.
    bus.ok_or_else(|| {
        StationError::open(device, SensorError::Serial("bus not declared".to_string()))
    })
}
