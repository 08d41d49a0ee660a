//! Protocol records and the newline-delimited JSON wire codec
//!
//! Each record on the bus is one JSON object per line:
//! `{"c":<command>,"s":<source>,"d":<destination>,"b":<base64 payload>,"l":<len>}`.
//! The payload is at most [`MAX_PAYLOAD`] bytes; its interpretation depends
//! on the command code. The concrete serialization has not been validated
//! against hardware captures yet, so everything wire-shaped lives here.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::{Direction, ModuleId, ModuleKind, PropertyId};

/// Maximum payload length in bytes
pub const MAX_PAYLOAD: usize = 8;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("unknown command code {0}")]
    UnknownCommand(u8),
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD} byte limit")]
    PayloadTooLong(usize),
    #[error("declared payload length {declared} does not match {actual} decoded bytes")]
    LengthMismatch { declared: u8, actual: usize },
}

impl PacketError {
    /// Protocol errors are structurally valid records with bad contents;
    /// everything else is a decode failure.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}

/// Command codes of the bus protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCode {
    HealthCheck,
    PropertyGet,
    PropertySet,
    PropertyValue,
    ModuleAnnounce,
    TopologyRequest,
    TopologyResponse,
}

impl CommandCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::HealthCheck => 0,
            Self::PropertyGet => 1,
            Self::PropertySet => 2,
            Self::PropertyValue => 3,
            Self::ModuleAnnounce => 4,
            Self::TopologyRequest => 5,
            Self::TopologyResponse => 6,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, PacketError> {
        Ok(match code {
            0 => Self::HealthCheck,
            1 => Self::PropertyGet,
            2 => Self::PropertySet,
            3 => Self::PropertyValue,
            4 => Self::ModuleAnnounce,
            5 => Self::TopologyRequest,
            6 => Self::TopologyResponse,
            other => return Err(PacketError::UnknownCommand(other)),
        })
    }
}

/// JSON shape of one wire record
#[derive(Serialize, Deserialize)]
struct WireRecord {
    c: u8,
    s: u16,
    d: u16,
    b: String,
    l: u8,
}

/// One decoded (or to-be-encoded) protocol record
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub command: CommandCode,
    pub source: ModuleId,
    pub destination: ModuleId,
    pub data: Vec<u8>,
    /// Arrival timestamp; `None` on packets built for sending
    pub received_at: Option<DateTime<Utc>>,
}

impl Packet {
    pub fn new(
        command: CommandCode,
        source: ModuleId,
        destination: ModuleId,
        data: Vec<u8>,
    ) -> Result<Self, PacketError> {
        if data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLong(data.len()));
        }
        Ok(Self {
            command,
            source,
            destination,
            data,
            received_at: None,
        })
    }

    /// Empty-payload health check broadcast
    pub fn health_check(source: ModuleId) -> Self {
        Self {
            command: CommandCode::HealthCheck,
            source,
            destination: ModuleId::BROADCAST,
            data: Vec::new(),
            received_at: None,
        }
    }

    /// Ask a module (or everyone) for its neighbor claims
    pub fn topology_request(source: ModuleId, destination: ModuleId) -> Self {
        Self {
            command: CommandCode::TopologyRequest,
            source,
            destination,
            data: Vec::new(),
            received_at: None,
        }
    }

    /// Discovery ping: an empty announce addressed to the broadcast id
    pub fn discovery_request(source: ModuleId) -> Self {
        Self {
            command: CommandCode::ModuleAnnounce,
            source,
            destination: ModuleId::BROADCAST,
            data: Vec::new(),
            received_at: None,
        }
    }

    /// Announce payload: `[kind u8, reserved u8, uuid u32 LE]`
    pub fn module_announce(source: ModuleId, kind: ModuleKind, uuid: u32) -> Self {
        let mut data = vec![kind.code(), 0];
        data.extend_from_slice(&uuid.to_le_bytes());
        Self {
            command: CommandCode::ModuleAnnounce,
            source,
            destination: ModuleId::BROADCAST,
            data,
            received_at: None,
        }
    }

    /// Property report payload: `[property u8, f32 LE]`
    pub fn property_value(source: ModuleId, property: PropertyId, value: f32) -> Self {
        let mut data = vec![property.0];
        data.extend_from_slice(&value.to_le_bytes());
        Self {
            command: CommandCode::PropertyValue,
            source,
            destination: ModuleId::BROADCAST,
            data,
            received_at: None,
        }
    }

    /// Neighbor claims payload: four u16 LE ids, 0xFFFF meaning empty slot
    pub fn topology_response(source: ModuleId, neighbors: [Option<ModuleId>; 4]) -> Self {
        let mut data = Vec::with_capacity(8);
        for slot in neighbors {
            let raw = slot.map(|id| id.0).unwrap_or(0xFFFF);
            data.extend_from_slice(&raw.to_le_bytes());
        }
        Self {
            command: CommandCode::TopologyResponse,
            source,
            destination: ModuleId::BROADCAST,
            data,
            received_at: None,
        }
    }

    /// Parse an announce payload into (kind code, uuid)
    pub fn decode_announce(&self) -> Option<(u8, u32)> {
        if self.data.len() < 6 {
            return None;
        }
        let uuid = u32::from_le_bytes(self.data[2..6].try_into().ok()?);
        Some((self.data[0], uuid))
    }

    /// Parse a property payload into (property id, value)
    pub fn decode_property(&self) -> Option<(PropertyId, f32)> {
        if self.data.len() < 5 {
            return None;
        }
        let value = f32::from_le_bytes(self.data[1..5].try_into().ok()?);
        Some((PropertyId(self.data[0]), value))
    }

    /// Parse a topology payload into four directional neighbor claims
    pub fn decode_neighbors(&self) -> Option<[Option<ModuleId>; 4]> {
        if self.data.len() < 8 {
            return None;
        }
        let mut neighbors = [None; 4];
        for dir in Direction::ALL {
            let offset = dir.index() * 2;
            let raw = u16::from_le_bytes(self.data[offset..offset + 2].try_into().ok()?);
            neighbors[dir.index()] = (raw != 0xFFFF).then_some(ModuleId(raw));
        }
        Some(neighbors)
    }

    /// Encode as one newline-terminated wire record
    pub fn encode_line(&self) -> String {
        let record = WireRecord {
            c: self.command.code(),
            s: self.source.0,
            d: self.destination.0,
            b: BASE64.encode(&self.data),
            l: self.data.len() as u8,
        };
        let mut line =
            serde_json::to_string(&record).expect("wire record serialization is infallible");
        line.push('\n');
        line
    }

    /// Decode one record (without its line terminator)
    pub fn decode_line(line: &str, received_at: Option<DateTime<Utc>>) -> Result<Self, PacketError> {
        let record: WireRecord =
            serde_json::from_str(line).map_err(|e| PacketError::Malformed(e.to_string()))?;
        let command = CommandCode::from_code(record.c)?;
        let data = BASE64
            .decode(record.b.as_bytes())
            .map_err(|e| PacketError::Malformed(e.to_string()))?;
        if data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLong(data.len()));
        }
        if record.l as usize != data.len() {
            return Err(PacketError::LengthMismatch {
                declared: record.l,
                actual: data.len(),
            });
        }
        Ok(Self {
            command,
            source: ModuleId(record.s),
            destination: ModuleId(record.d),
            data,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::property;

    #[test]
    fn test_round_trip_every_command_and_length() {
        for code in 0..=6 {
            let command = CommandCode::from_code(code).unwrap();
            for len in 0..=MAX_PAYLOAD {
                let data: Vec<u8> = (0..len as u8).collect();
                let packet = Packet::new(command, ModuleId(3), ModuleId(7), data).unwrap();
                let line = packet.encode_line();
                let decoded = Packet::decode_line(line.trim_end(), None).unwrap();
                assert_eq!(decoded, packet);
                assert_eq!(decoded.encode_line(), line);
            }
        }
    }

    #[test]
    fn test_unknown_command_is_protocol_error() {
        let line = r#"{"c":42,"s":1,"d":2,"b":"","l":0}"#;
        let err = Packet::decode_line(line, None).unwrap_err();
        assert!(matches!(err, PacketError::UnknownCommand(42)));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_malformed_record_is_decode_error() {
        let err = Packet::decode_line("not-a-record", None).unwrap_err();
        assert!(matches!(err, PacketError::Malformed(_)));
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        // "AAAA" decodes to 3 bytes but the record declares 2
        let line = r#"{"c":0,"s":1,"d":2,"b":"AAAA","l":2}"#;
        let err = Packet::decode_line(line, None).unwrap_err();
        assert!(matches!(
            err,
            PacketError::LengthMismatch {
                declared: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_payload_cap_enforced() {
        let err = Packet::new(CommandCode::PropertySet, ModuleId(1), ModuleId(2), vec![0; 9])
            .unwrap_err();
        assert!(matches!(err, PacketError::PayloadTooLong(9)));
    }

    #[test]
    fn test_announce_payload_round_trip() {
        let packet = Packet::module_announce(ModuleId(5), ModuleKind::Gyro, 0xDEADBEEF);
        let (kind_code, uuid) = packet.decode_announce().unwrap();
        assert_eq!(kind_code, ModuleKind::Gyro.code());
        assert_eq!(uuid, 0xDEADBEEF);
    }

    #[test]
    fn test_property_payload_round_trip() {
        let packet = Packet::property_value(ModuleId(1), property::DEGREE, 42.5);
        let (prop, value) = packet.decode_property().unwrap();
        assert_eq!(prop, property::DEGREE);
        assert_eq!(value, 42.5);
    }

    #[test]
    fn test_neighbor_payload_round_trip() {
        let neighbors = [Some(ModuleId(1)), None, None, Some(ModuleId(2))];
        let packet = Packet::topology_response(ModuleId(0), neighbors);
        assert_eq!(packet.data.len(), 8);
        assert_eq!(packet.decode_neighbors().unwrap(), neighbors);
    }
}
