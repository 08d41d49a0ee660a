//! Blocking serial transport to the network-bridge module

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

use crate::discovery::discover_bridge_port;
use crate::{Transport, TransportError};

/// Bus baud rate used by the bridge firmware
pub const BAUD_RATE: u32 = 921_600;

/// Read timeout; short because the worker polls in a tight loop
const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open an explicit serial device
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let port = serialport::new(path, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;
        debug!(port = path, baud = BAUD_RATE, "serial port opened");
        Ok(Self { port })
    }

    /// Discover the bridge by its hardware signature and open it
    pub fn open_auto() -> Result<Self, TransportError> {
        let path = discover_bridge_port()?;
        Self::open(&path)
    }
}

impl Transport for SerialTransport {
    fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(None);
        }
        let mut chunk = vec![0u8; pending];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                chunk.truncate(n);
                trace!(bytes = n, "serial chunk received");
                Ok(Some(chunk))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        trace!(bytes = bytes.len(), "serial chunk sent");
        Ok(())
    }
}
