//! Axon Transport - byte-stream boundary to the physical bus
//!
//! Everything above this crate is transport-agnostic: the driver consumes
//! an ordered sequence of byte chunks and produces byte buffers to send.
//! Chunk boundaries carry no semantic meaning. Concrete links implement
//! [`Transport`]; shipping here are the serial implementation used with
//! the network-bridge module and an in-memory mock for tests.

pub mod discovery;
pub mod mock;
pub mod serial;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// No explicit port was given and no attached bridge matched the
    /// hardware signature
    #[error("no bridge module found on any serial port")]
    NoDeviceFound,
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection mode not supported on this host: {0}")]
    Unsupported(&'static str),
}

/// A byte-stream source/sink bound to one physical link.
///
/// `recv_chunk` is a bounded, non-blocking read: `Ok(None)` means nothing
/// is pending right now and is a normal no-op for the caller. `send` is a
/// best-effort, order-preserving write of one buffer. Any `Err` from
/// either side means the link is dead.
pub trait Transport: Send {
    fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

pub use discovery::{discover_bridge_port, find_bridge_port, BRIDGE_PID, BRIDGE_VID};
pub use mock::{MockHandle, MockTransport};
pub use serial::SerialTransport;
