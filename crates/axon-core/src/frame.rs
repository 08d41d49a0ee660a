//! Frame decoder for the newline-delimited byte stream
//!
//! Chunk boundaries carry no meaning on the bus: a record may arrive split
//! across any number of reads, or several records may land in one read.
//! The decoder buffers a partial tail between calls and must produce the
//! same packets no matter how the input was chunked. A record that fails
//! to parse is dropped and counted; decoding never aborts the stream.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::packet::Packet;

/// Frame terminator on the wire
const TERMINATOR: u8 = b'\n';

/// Accumulating decoder turning raw chunks into packets
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    decode_errors: u64,
    protocol_errors: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every complete record it finishes.
    ///
    /// `received_at` is stamped on every packet completed by this chunk.
    pub fn push(&mut self, chunk: &[u8], received_at: DateTime<Utc>) -> Vec<Packet> {
        self.buffer.extend_from_slice(chunk);

        let mut packets = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == TERMINATOR) {
            let line: Vec<u8> = self.buffer.drain(..=pos).take(pos).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(s) => s.trim_end_matches('\r'),
                Err(_) => {
                    self.decode_errors += 1;
                    warn!("dropping non-utf8 record");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match Packet::decode_line(line, Some(received_at)) {
                Ok(packet) => packets.push(packet),
                Err(e) if e.is_protocol() => {
                    self.protocol_errors += 1;
                    warn!(error = %e, "dropping record with protocol violation");
                }
                Err(e) => {
                    self.decode_errors += 1;
                    warn!(error = %e, "dropping malformed record");
                }
            }
        }
        packets
    }

    /// Records dropped because they failed to parse
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    /// Records dropped for unknown commands or out-of-range payloads
    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Bytes buffered while waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any buffered partial record and reset counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.decode_errors = 0;
        self.protocol_errors = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleId, ModuleKind};
    use crate::packet::{CommandCode, Packet};

    fn announce_line() -> String {
        Packet::module_announce(ModuleId(1), ModuleKind::Button, 0x11).encode_line()
    }

    #[test]
    fn test_single_record_single_chunk() {
        let mut decoder = FrameDecoder::new();
        let packets = decoder.push(announce_line().as_bytes(), Utc::now());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].command, CommandCode::ModuleAnnounce);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_reassembly_at_every_split_point() {
        let line = announce_line();
        let bytes = line.as_bytes();
        for split in 1..bytes.len() {
            let mut decoder = FrameDecoder::new();
            let now = Utc::now();
            let mut packets = decoder.push(&bytes[..split], now);
            packets.extend(decoder.push(&bytes[split..], now));
            assert_eq!(packets.len(), 1, "split at byte {split}");
            assert_eq!(packets[0].source, ModuleId(1));
            assert_eq!(decoder.decode_errors(), 0);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let line = announce_line();
        let mut decoder = FrameDecoder::new();
        let now = Utc::now();
        let mut packets = Vec::new();
        for byte in line.as_bytes() {
            packets.extend(decoder.push(&[*byte], now));
        }
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_multiple_records_in_one_chunk() {
        let mut input = String::new();
        for id in 1..=3 {
            input.push_str(&Packet::module_announce(ModuleId(id), ModuleKind::Led, 0).encode_line());
        }
        let mut decoder = FrameDecoder::new();
        let packets = decoder.push(input.as_bytes(), Utc::now());
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].source, ModuleId(3));
    }

    #[test]
    fn test_malformed_record_between_two_good_ones() {
        let good = announce_line();
        let input = format!("{good}not-a-record\n{good}");
        let mut decoder = FrameDecoder::new();
        let packets = decoder.push(input.as_bytes(), Utc::now());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].source, ModuleId(1));
        assert_eq!(packets[1].source, ModuleId(1));
        assert_eq!(decoder.decode_errors(), 1);
        assert_eq!(decoder.protocol_errors(), 0);
    }

    #[test]
    fn test_unknown_command_counts_as_protocol_error() {
        let mut decoder = FrameDecoder::new();
        let packets = decoder.push(b"{\"c\":99,\"s\":1,\"d\":2,\"b\":\"\",\"l\":0}\n", Utc::now());
        assert!(packets.is_empty());
        assert_eq!(decoder.protocol_errors(), 1);
        assert_eq!(decoder.decode_errors(), 0);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut decoder = FrameDecoder::new();
        let input = format!("\n\r\n{}", announce_line());
        let packets = decoder.push(input.as_bytes(), Utc::now());
        assert_eq!(packets.len(), 1);
        assert_eq!(decoder.decode_errors(), 0);
    }
}
