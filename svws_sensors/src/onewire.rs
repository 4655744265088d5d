//! DS18B20 temperature probes over the kernel w1 bus.
//!
//! The kernel exposes each probe as `<devices_dir>/28-<id>/w1_slave`, two
//! text lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! `YES` means the conversion CRC checked out and `t=` carries millidegrees
//! Celsius; `NO` means the probe was read before a conversion finished.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use svws_common::instrument::{Instrument, Observation, SensorError};
use svws_common::record::{Value, field};
use svws_common::units;

/// Family code prefix of DS18B20 device directories.
pub const DS18B20_FAMILY: &str = "28";

/// One probe on the bus.
#[derive(Debug, Clone)]
pub struct W1Probe {
    path: PathBuf,
}

impl W1Probe {
    /// Address a probe by id, with or without the `28-` family prefix.
    pub fn new(devices_dir: &Path, id: &str) -> Self {
        let dir = if id.contains('-') {
            id.to_string()
        } else {
            format!("{DS18B20_FAMILY}-{id}")
        };
        Self {
            path: devices_dir.join(dir).join("w1_slave"),
        }
    }

    pub fn read_celsius(&self) -> Result<f64, SensorError> {
        let content = fs::read_to_string(&self.path)?;
        parse_w1_slave(&content)
    }
}

/// List the ids of all DS18B20 devices on the bus.
pub fn discover(devices_dir: &Path) -> io::Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(devices_dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("28-") {
            ids.push(name.into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

pub(crate) fn parse_w1_slave(content: &str) -> Result<f64, SensorError> {
    let mut lines = content.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| SensorError::InvalidResponse("empty w1_slave file".to_string()))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorError::NotReady);
    }

    let data_line = lines
        .next()
        .ok_or_else(|| SensorError::InvalidResponse("missing data line".to_string()))?;
    let millidegrees = data_line
        .split_once("t=")
        .ok_or_else(|| SensorError::InvalidResponse("missing t= field".to_string()))?
        .1
        .trim()
        .parse::<i32>()
        .map_err(|_| SensorError::InvalidResponse("unparsable temperature".to_string()))?;

    Ok(units::millidegrees_to_c(millidegrees))
}

/// The probe inside the electronics enclosure.
pub struct EnclosureProbe {
    probe: W1Probe,
}

impl EnclosureProbe {
    pub fn new(probe: W1Probe) -> Self {
        Self { probe }
    }
}

impl Instrument for EnclosureProbe {
    fn label(&self) -> &str {
        "enclosure_temp"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let celsius = self.probe.read_celsius()?;
        Ok(vec![(
            field::ENCLOSURE_TEMP,
            Value::Float(units::c_to_f(celsius)),
        )])
    }
}

/// The six-probe soil temperature ladder, polled as a group.
///
/// A not-ready probe makes the whole group absent for the cycle; partial
/// ladders would be more confusing downstream than missing ones.
pub struct SoilLadder {
    probes: [W1Probe; 6],
}

impl SoilLadder {
    /// Probes in depth order, shallowest first (matching
    /// [`field::SOIL_TEMPS`]).
    pub fn new(probes: [W1Probe; 6]) -> Self {
        Self { probes }
    }

    pub fn from_ids(devices_dir: &Path, ids: [&str; 6]) -> Self {
        Self::new(ids.map(|id| W1Probe::new(devices_dir, id)))
    }
}

impl Instrument for SoilLadder {
    fn label(&self) -> &str {
        "soil_temps"
    }

    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let mut obs = Vec::with_capacity(self.probes.len());
        for (name, probe) in field::SOIL_TEMPS.iter().zip(&self.probes) {
            let celsius = probe.read_celsius()?;
            obs.push((*name, Value::Float(units::c_to_f(celsius))));
        }
        Ok(obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const READY: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                         72 01 4b 46 7f ff 0e 10 57 t=23125\n";
    const NOT_READY: &str = "ff ff 4b 46 7f ff 0e 10 ff : crc=ff NO\n\
                             ff ff 4b 46 7f ff 0e 10 ff t=85000\n";

    /// Lay out a fake w1 sysfs tree.
    fn fake_bus(devices: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in devices {
            let device = dir.path().join(name);
            fs::create_dir_all(&device).unwrap();
            fs::write(device.join("w1_slave"), content).unwrap();
        }
        dir
    }

    #[test]
    fn parse_ready_reading() {
        assert_eq!(parse_w1_slave(READY).unwrap(), 23.125);
    }

    #[test]
    fn parse_not_ready_reading() {
        assert!(matches!(parse_w1_slave(NOT_READY), Err(SensorError::NotReady)));
    }

    #[test]
    fn parse_negative_reading() {
        let content = "e8 ff 4b 46 7f ff 0e 10 91 : crc=91 YES\n\
                       e8 ff 4b 46 7f ff 0e 10 91 t=-1500\n";
        assert_eq!(parse_w1_slave(content).unwrap(), -1.5);
    }

    #[test]
    fn parse_rejects_malformed_content() {
        assert!(matches!(
            parse_w1_slave(""),
            Err(SensorError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_w1_slave("72 01 ... : crc=57 YES\n"),
            Err(SensorError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_w1_slave("72 01 ... : crc=57 YES\n72 01 t=abc\n"),
            Err(SensorError::InvalidResponse(_))
        ));
    }

    #[test]
    fn probe_reads_through_sysfs() {
        let bus = fake_bus(&[("28-0000071c9e1e", READY)]);

        // Bare and prefixed ids address the same device.
        let probe = W1Probe::new(bus.path(), "0000071c9e1e");
        assert_eq!(probe.read_celsius().unwrap(), 23.125);

        let probe = W1Probe::new(bus.path(), "28-0000071c9e1e");
        assert_eq!(probe.read_celsius().unwrap(), 23.125);
    }

    #[test]
    fn missing_probe_is_an_io_error() {
        let bus = fake_bus(&[]);
        let probe = W1Probe::new(bus.path(), "0000071c9e1e");
        assert!(matches!(probe.read_celsius(), Err(SensorError::Io(_))));
    }

    #[test]
    fn enclosure_probe_reports_fahrenheit() {
        let bus = fake_bus(&[("28-0000071c9e1e", READY)]);
        let mut probe = EnclosureProbe::new(W1Probe::new(bus.path(), "0000071c9e1e"));

        let obs = probe.observe().unwrap();
        assert_eq!(obs.len(), 1);
        let (name, value) = obs[0];
        assert_eq!(name, field::ENCLOSURE_TEMP);
        let Value::Float(f) = value else {
            panic!("expected float, got {value:?}");
        };
        assert!((f - 73.625).abs() < 1e-9);
    }

    #[test]
    fn soil_ladder_reports_all_six_in_depth_order() {
        let ids = ["a", "b", "c", "d", "e", "f"];
        let devices: Vec<(String, &str)> =
            ids.iter().map(|id| (format!("28-{id}"), READY)).collect();
        let devices: Vec<(&str, &str)> = devices
            .iter()
            .map(|(name, content)| (name.as_str(), *content))
            .collect();
        let bus = fake_bus(&devices);

        let mut ladder = SoilLadder::from_ids(bus.path(), ids);
        let obs = ladder.observe().unwrap();

        let names: Vec<&str> = obs.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, field::SOIL_TEMPS);
    }

    #[test]
    fn soil_ladder_fails_as_a_group() {
        let bus = fake_bus(&[
            ("28-a", READY),
            ("28-b", READY),
            ("28-c", NOT_READY),
            ("28-d", READY),
            ("28-e", READY),
            ("28-f", READY),
        ]);

        let mut ladder = SoilLadder::from_ids(bus.path(), ["a", "b", "c", "d", "e", "f"]);
        assert!(matches!(ladder.observe(), Err(SensorError::NotReady)));
    }

    #[test]
    fn discover_lists_only_thermometer_devices() {
        let bus = fake_bus(&[("28-a", READY), ("28-b", READY)]);
        fs::create_dir_all(bus.path().join("w1_bus_master1")).unwrap();

        let ids = discover(bus.path()).unwrap();
        assert_eq!(ids, vec!["28-a", "28-b"]);
    }
}
