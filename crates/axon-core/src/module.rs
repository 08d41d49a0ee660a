//! Module types for tracking hardware on the shared bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bus address of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u16);

impl ModuleId {
    /// Destination sentinel addressing every module on the bus
    pub const BROADCAST: ModuleId = ModuleId(0x0FFF);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical module kind reported in announce packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Network,
    Button,
    Dial,
    Env,
    Gyro,
    Ir,
    Led,
    Mic,
    Motor,
    Speaker,
    Ultrasonic,
    Display,
    AiCamera,
    AiSpeaker,
    AiMic,
}

impl ModuleKind {
    /// Wire code carried in the announce payload
    pub fn code(&self) -> u8 {
        match self {
            Self::Network => 0,
            Self::Button => 1,
            Self::Dial => 2,
            Self::Env => 3,
            Self::Gyro => 4,
            Self::Ir => 5,
            Self::Led => 6,
            Self::Mic => 7,
            Self::Motor => 8,
            Self::Speaker => 9,
            Self::Ultrasonic => 10,
            Self::Display => 11,
            Self::AiCamera => 12,
            Self::AiSpeaker => 13,
            Self::AiMic => 14,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Network,
            1 => Self::Button,
            2 => Self::Dial,
            3 => Self::Env,
            4 => Self::Gyro,
            5 => Self::Ir,
            6 => Self::Led,
            7 => Self::Mic,
            8 => Self::Motor,
            9 => Self::Speaker,
            10 => Self::Ultrasonic,
            11 => Self::Display,
            12 => Self::AiCamera,
            13 => Self::AiSpeaker,
            14 => Self::AiMic,
            _ => return None,
        })
    }

    /// Short name used when rendering the topology map
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "Network",
            Self::Button => "Button",
            Self::Dial => "Dial",
            Self::Env => "Env",
            Self::Gyro => "Gyro",
            Self::Ir => "Ir",
            Self::Led => "Led",
            Self::Mic => "Mic",
            Self::Motor => "Motor",
            Self::Speaker => "Speaker",
            Self::Ultrasonic => "Ultrasonic",
            Self::Display => "Display",
            Self::AiCamera => "AiCamera",
            Self::AiSpeaker => "AiSpeaker",
            Self::AiMic => "AiMic",
        }
    }
}

/// Physical attachment direction of a neighbor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Right,
    Top,
    Left,
    Bottom,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Right,
        Direction::Top,
        Direction::Left,
        Direction::Bottom,
    ];

    pub fn index(&self) -> usize {
        match self {
            Self::Right => 0,
            Self::Top => 1,
            Self::Left => 2,
            Self::Bottom => 3,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Self::Right => Self::Left,
            Self::Top => Self::Bottom,
            Self::Left => Self::Right,
            Self::Bottom => Self::Top,
        }
    }
}

/// Connection lifecycle of a module descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Referenced by traffic but not yet announced
    Reserved,
    /// Announced and alive
    Connected,
    /// Liveness timeout elapsed; last-known state retained
    Disconnected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Reserved
    }
}

/// Identifier of a typed module property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub u8);

/// Well-known property ids shared by several module kinds
pub mod property {
    use super::PropertyId;

    pub const CLICKED: PropertyId = PropertyId(1);
    pub const DEGREE: PropertyId = PropertyId(2);
    pub const DISTANCE: PropertyId = PropertyId(3);
    pub const TEMPERATURE: PropertyId = PropertyId(4);
    pub const HUMIDITY: PropertyId = PropertyId(5);
    pub const BRIGHTNESS: PropertyId = PropertyId(6);
    pub const SPEED: PropertyId = PropertyId(7);
    pub const VOLUME: PropertyId = PropertyId(8);
}

/// One cached property value with its write timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub value: f32,
    pub updated_at: DateTime<Utc>,
}

/// A module known to the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique bus address
    pub id: ModuleId,
    /// Kind tag; `None` until the module has announced itself
    pub kind: Option<ModuleKind>,
    /// Opaque hardware identifier from the announce payload
    pub uuid: u32,
    pub state: ConnectionState,
    /// Last time any traffic referenced this id
    pub last_seen: DateTime<Utc>,
    /// Neighbor claims by direction, as last reported by the module
    pub neighbors: [Option<ModuleId>; 4],
    /// Cached property values
    pub properties: HashMap<PropertyId, PropertyEntry>,
}

impl ModuleDescriptor {
    /// Create a descriptor for a freshly announced module
    pub fn announced(id: ModuleId, kind: ModuleKind, uuid: u32, at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: Some(kind),
            uuid,
            state: ConnectionState::Connected,
            last_seen: at,
            neighbors: [None; 4],
            properties: HashMap::new(),
        }
    }

    /// Create a placeholder for an id seen before its announce
    pub fn reserved(id: ModuleId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: None,
            uuid: 0,
            state: ConnectionState::Reserved,
            last_seen: at,
            neighbors: [None; 4],
            properties: HashMap::new(),
        }
    }

    /// Refresh the liveness timestamp
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    /// Check whether the module has been silent longer than the timeout
    pub fn is_stale(&self, timeout_ms: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_milliseconds() > timeout_ms
    }

    /// Write a property value. Timestamps are kept monotonically
    /// non-decreasing even if the caller's clock stutters.
    pub fn set_property(&mut self, id: PropertyId, value: f32, at: DateTime<Utc>) {
        let at = match self.properties.get(&id) {
            Some(prev) if prev.updated_at > at => prev.updated_at,
            _ => at,
        };
        self.properties.insert(
            id,
            PropertyEntry {
                value,
                updated_at: at,
            },
        );
    }

    pub fn property(&self, id: PropertyId) -> Option<&PropertyEntry> {
        self.properties.get(&id)
    }

    pub fn neighbor(&self, direction: Direction) -> Option<ModuleId> {
        self.neighbors[direction.index()]
    }
}
