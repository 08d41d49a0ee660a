//! Axon Core - Protocol records, module registry and topology graph
//!
//! This crate provides the foundational types for the Axon driver:
//! - Packet codec for the newline-delimited bus protocol
//! - Frame decoder tolerant of arbitrary chunk boundaries
//! - Module descriptors and the registry of known modules
//! - Topology graph reconstructed from directional neighbor claims

pub mod frame;
pub mod module;
pub mod packet;
pub mod registry;
pub mod topology;

pub use frame::FrameDecoder;
pub use module::{
    ConnectionState, Direction, ModuleDescriptor, ModuleId, ModuleKind, PropertyEntry, PropertyId,
};
pub use packet::{CommandCode, Packet, PacketError, MAX_PAYLOAD};
pub use registry::ModuleRegistry;
pub use topology::{render_module_map, TopologyGraph};
