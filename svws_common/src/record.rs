//! Loop packet assembly and serialization.
//!
//! A *loop packet* is the aggregation host's unit of exchange: one
//! timestamped, flat key/value record per polling cycle. Fields are only
//! present when the backing sensor produced a convertible value this cycle;
//! there are no null placeholders inside a packet.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Canonical observation field names.
///
/// These are the keys the aggregation host maps onto its observation groups,
/// so they must not be renamed independently of the host's schema.
pub mod field {
    pub const OUT_TEMP: &str = "outTemp";
    pub const OUT_HUMIDITY: &str = "outHumidity";
    pub const WIND_DIR: &str = "windDir";
    pub const WIND_SPEED: &str = "windSpeed";
    pub const RAIN: &str = "rain";
    pub const ENCLOSURE_TEMP: &str = "enclosureTemp";

    /// Soil probe ladder, shallowest first.
    pub const SOIL_TEMPS: [&str; 6] = [
        "soilTemp_6_in",
        "soilTemp_2_ft",
        "soilTemp_4_ft",
        "soilTemp_6_ft",
        "soilTemp_8_ft",
        "soilTemp_10_ft",
    ];

    pub const BMS_VOLTAGE: &str = "bmsVoltage";
    /// The station's pack has four cells; the host schema is fixed at four.
    pub const BMS_CELL_VOLTAGES: [&str; 4] = [
        "bmsCell1Voltage",
        "bmsCell2Voltage",
        "bmsCell3Voltage",
        "bmsCell4Voltage",
    ];
    pub const BMS_CYCLES: &str = "bmsCycles";
    pub const BMS_TEMP: &str = "bmsTemp";

    pub const VE_BAT_VOLTAGE: &str = "veBatVoltage";
    pub const VE_TOTAL_CURRENT: &str = "veTotalCurrent";
    pub const VE_PANEL_VOLTAGE: &str = "vePanelVoltage";
    pub const VE_PANEL_POWER: &str = "vePanelPower";
    pub const VE_MODE: &str = "veMode";
    pub const VE_MPPT: &str = "veMPPT";
    pub const VE_OFF_REASON: &str = "veOffReason";
    pub const VE_ERROR: &str = "veError";
    pub const VE_LOAD: &str = "veLoad";
    pub const VE_LOAD_CURRENT: &str = "veLoadCurrent";
    pub const VE_YIELD_TOTAL: &str = "veYieldTotal";
    pub const VE_YIELD_TODAY: &str = "veYieldToday";
    pub const VE_YIELD_YESTERDAY: &str = "veYieldYesterday";
    pub const VE_MAX_POWER_TODAY: &str = "veMaxPowerToday";
    pub const VE_MAX_POWER_YESTERDAY: &str = "veMaxPowerYesterday";
    pub const VE_DAY_SEQ_NUM: &str = "veDaySeqNum";
}

/// A single scalar observation value.
///
/// Serializes as the bare JSON scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Unit convention marker for a packet.
///
/// The aggregation host identifies unit systems by numeric code; this station
/// always emits `Us` (°F, mph, volts, amps, watts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitSystem {
    #[default]
    Us,
    Metric,
}

impl UnitSystem {
    /// Numeric code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Us => 0x01,
            Self::Metric => 0x10,
        }
    }
}

impl Serialize for UnitSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One timestamped sensor reading set.
///
/// Serializes to a single flat JSON object: `dateTime`, `usUnits`, then one
/// key per observation. Field order is deterministic (sorted), so emitted
/// JSON is stable for a given observation set.
#[derive(Debug, Clone)]
pub struct LoopPacket {
    /// Packet timestamp, Unix seconds rounded to nearest.
    pub date_time: u64,
    /// Unit convention of every field in this packet.
    pub unit_system: UnitSystem,
    fields: BTreeMap<&'static str, Value>,
}

impl LoopPacket {
    /// Create an empty US-units packet stamped with the given time.
    pub fn new(date_time: u64) -> Self {
        Self {
            date_time,
            unit_system: UnitSystem::Us,
            fields: BTreeMap::new(),
        }
    }

    /// Add one observation. A later insert for the same field wins.
    pub fn insert(&mut self, field: &'static str, value: impl Into<Value>) {
        self.fields.insert(field, value.into());
    }

    /// Add a batch of observations.
    pub fn extend(&mut self, observations: impl IntoIterator<Item = (&'static str, Value)>) {
        self.fields.extend(observations);
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.get(field).copied()
    }

    /// Number of observation fields (excluding timestamp and unit marker).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate observations in emission order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Value)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, *v))
    }
}

impl Serialize for LoopPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry("dateTime", &self.date_time)?;
        map.serialize_entry("usUnits", &self.unit_system)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_packet_serializes_header_only() {
        let packet = LoopPacket::new(1660000000);
        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(json, r#"{"dateTime":1660000000,"usUnits":1}"#);
    }

    #[test]
    fn values_serialize_as_bare_scalars() {
        let mut packet = LoopPacket::new(1660000000);
        packet.insert(field::OUT_TEMP, 72.5);
        packet.insert(field::VE_LOAD, true);
        packet.insert(field::BMS_CYCLES, 12i64);

        let json = serde_json::to_string(&packet).unwrap();
        assert_eq!(
            json,
            r#"{"dateTime":1660000000,"usUnits":1,"bmsCycles":12,"outTemp":72.5,"veLoad":true}"#
        );
    }

    #[test]
    fn field_order_is_insertion_independent() {
        let mut a = LoopPacket::new(0);
        a.insert(field::WIND_DIR, 180.0);
        a.insert(field::RAIN, 0.2);

        let mut b = LoopPacket::new(0);
        b.insert(field::RAIN, 0.2);
        b.insert(field::WIND_DIR, 180.0);

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn later_insert_wins() {
        let mut packet = LoopPacket::new(0);
        packet.insert(field::RAIN, 0.1);
        packet.insert(field::RAIN, 0.3);
        assert_eq!(packet.get(field::RAIN), Some(Value::Float(0.3)));
        assert_eq!(packet.len(), 1);
    }

    #[test]
    fn unit_system_codes() {
        assert_eq!(UnitSystem::Us.code(), 0x01);
        assert_eq!(UnitSystem::Metric.code(), 0x10);
    }
}
