//! In-memory transport for tests and offline demos
//!
//! The transport half is moved into the transport worker; the matching
//! [`MockHandle`] stays with the test, which can feed inbound chunks,
//! inspect everything the driver sent, and sever the link to exercise
//! the crash path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{Transport, TransportError};

#[derive(Default)]
struct MockShared {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    severed: AtomicBool,
}

pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side handle to a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let shared = Arc::new(MockShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            MockHandle { shared },
        )
    }
}

impl Transport for MockTransport {
    fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.shared.severed.load(Ordering::Relaxed) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link severed",
            )));
        }
        Ok(self.shared.inbound.lock().unwrap().pop_front())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.shared.severed.load(Ordering::Relaxed) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link severed",
            )));
        }
        self.shared.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

impl MockHandle {
    /// Queue an inbound chunk as if it arrived from the bus
    pub fn push(&self, chunk: impl Into<Vec<u8>>) {
        self.shared.inbound.lock().unwrap().push_back(chunk.into());
    }

    /// Everything the driver has sent so far, one buffer per send
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.sent.lock().unwrap().clone()
    }

    /// Sent buffers reassembled and split into protocol lines
    pub fn sent_lines(&self) -> Vec<String> {
        let joined: Vec<u8> = self.sent().concat();
        String::from_utf8_lossy(&joined)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Make every subsequent transport call fail
    pub fn sever(&self) {
        self.shared.severed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_round_trip() {
        let (mut transport, handle) = MockTransport::new();
        assert!(transport.recv_chunk().unwrap().is_none());

        handle.push(b"abc".to_vec());
        assert_eq!(transport.recv_chunk().unwrap().unwrap(), b"abc");
        assert!(transport.recv_chunk().unwrap().is_none());

        transport.send(b"xyz\n").unwrap();
        assert_eq!(handle.sent_lines(), vec!["xyz".to_string()]);
    }

    #[test]
    fn test_severed_link_fails() {
        let (mut transport, handle) = MockTransport::new();
        handle.sever();
        assert!(transport.recv_chunk().is_err());
        assert!(transport.send(b"x").is_err());
    }
}
