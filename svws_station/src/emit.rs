//! Packet emission.
//!
//! The aggregation host consumes the daemon's stdout: one JSON object per
//! line, one line per loop packet.

use std::io::{self, Write};
use svws_common::record::LoopPacket;

/// Sink for assembled loop packets.
pub trait PacketEmitter {
    fn emit(&mut self, packet: &LoopPacket) -> io::Result<()>;
}

/// One JSON object per line on the wrapped writer, flushed per packet so a
/// line-buffered consumer sees each packet as soon as it exists.
pub struct JsonLinesEmitter<W> {
    writer: W,
}

impl<W: Write> JsonLinesEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PacketEmitter for JsonLinesEmitter<W> {
    fn emit(&mut self, packet: &LoopPacket) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, packet)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
