//! SVWS Station Library
//!
//! Assembles the configured sensor set and runs the polling loop that turns
//! readings into loop packets for the aggregation host.
//!
//! # Module Structure
//!
//! - [`station`] - Station assembly and the polling loop
//! - [`emit`] - Packet emission (JSON lines on stdout)

pub mod emit;
pub mod station;

pub use emit::{JsonLinesEmitter, PacketEmitter};
pub use station::{Station, StationError};
