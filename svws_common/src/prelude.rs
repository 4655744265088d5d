//! Prelude module for common re-exports.
//!
//! # Usage
//!
//! ```rust
//! use svws_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, StationConfig};

// ─── Sensors ────────────────────────────────────────────────────────
pub use crate::instrument::{Instrument, Observation, SensorError};

// ─── Records ────────────────────────────────────────────────────────
pub use crate::record::{field, LoopPacket, UnitSystem, Value};
