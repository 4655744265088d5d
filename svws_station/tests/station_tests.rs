//! Station loop tests.
//!
//! Exercise the assembly loop against scripted instruments: failure
//! isolation, emission format, and loop termination on the shutdown flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{LoopPacket, Value, field};
use svws_station::emit::{JsonLinesEmitter, PacketEmitter};
use svws_station::station::Station;

struct FixedInstrument {
    label: &'static str,
    observations: Vec<Observation>,
}

impl Instrument for FixedInstrument {
    fn label(&self) -> &str {
        self.label
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        Ok(self.observations.clone())
    }
}

struct FailingInstrument;

impl Instrument for FailingInstrument {
    fn label(&self) -> &str {
        "failing"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        Err(SensorError::Timeout)
    }
}

#[test]
fn packet_collects_all_instruments() {
    let mut station = Station::with_instruments(
        vec![
            Box::new(FixedInstrument {
                label: "dht22",
                observations: vec![
                    (field::OUT_TEMP, Value::Float(72.5)),
                    (field::OUT_HUMIDITY, Value::Float(40.0)),
                ],
            }),
            Box::new(FixedInstrument {
                label: "rain",
                observations: vec![(field::RAIN, Value::Float(0.2))],
            }),
        ],
        Duration::from_millis(10),
    );

    let packet = station.poll_once();
    assert_eq!(packet.len(), 3);
    assert_eq!(packet.get(field::OUT_TEMP), Some(Value::Float(72.5)));
    assert_eq!(packet.get(field::RAIN), Some(Value::Float(0.2)));
    assert!(packet.date_time > 0);
}

#[test]
fn failing_instrument_costs_only_its_fields() {
    let mut station = Station::with_instruments(
        vec![
            Box::new(FailingInstrument),
            Box::new(FixedInstrument {
                label: "rain",
                observations: vec![(field::RAIN, Value::Float(0.2))],
            }),
        ],
        Duration::from_millis(10),
    );

    let packet = station.poll_once();
    assert_eq!(packet.len(), 1);
    assert_eq!(packet.get(field::RAIN), Some(Value::Float(0.2)));
}

#[test]
fn empty_station_yields_header_only_packets() {
    let mut station = Station::with_instruments(Vec::new(), Duration::from_millis(10));
    let packet = station.poll_once();
    assert!(packet.is_empty());

    let mut emitter = JsonLinesEmitter::new(Vec::new());
    emitter.emit(&packet).unwrap();
    let line = String::from_utf8(emitter.into_inner()).unwrap();
    assert!(line.starts_with(r#"{"dateTime":"#));
    assert!(line.trim_end().ends_with(r#""usUnits":1}"#));
}

/// Emitter that collects packets and clears the running flag after the
/// first one, so `run()` terminates deterministically.
struct OneShotEmitter {
    packets: Vec<LoopPacket>,
    running: Arc<AtomicBool>,
}

impl PacketEmitter for OneShotEmitter {
    fn emit(&mut self, packet: &LoopPacket) -> std::io::Result<()> {
        self.packets.push(packet.clone());
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn run_stops_when_the_flag_clears() {
    let mut station = Station::with_instruments(
        vec![Box::new(FixedInstrument {
            label: "rain",
            observations: vec![(field::RAIN, Value::Float(0.0))],
        })],
        Duration::from_millis(5),
    );

    let running = Arc::new(AtomicBool::new(true));
    let mut emitter = OneShotEmitter {
        packets: Vec::new(),
        running: running.clone(),
    };

    station.run(&mut emitter, &running).unwrap();
    assert_eq!(emitter.packets.len(), 1);
    assert_eq!(emitter.packets[0].get(field::RAIN), Some(Value::Float(0.0)));
}
