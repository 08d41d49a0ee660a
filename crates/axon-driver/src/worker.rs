//! Transport-owning worker
//!
//! Serial I/O blocks, so the transport runs in its own thread and the
//! rest of the driver only ever talks to it through two queues: raw
//! inbound chunks out, encoded outbound buffers in. No other memory is
//! shared across this boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use axon_transport::Transport;

/// Pump loop: one read pass and one write pass per iteration, a short
/// sleep in between, stop flag checked every iteration.
pub(crate) fn run_transport_worker(
    mut transport: Box<dyn Transport>,
    chunk_tx: Sender<Vec<u8>>,
    write_rx: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    pump_interval: Duration,
) {
    'pump: while !stop.load(Ordering::Relaxed) {
        match transport.recv_chunk() {
            Ok(Some(chunk)) if !chunk.is_empty() => {
                if chunk_tx.send(chunk).is_err() {
                    // Executor is gone; nothing left to feed
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "transport read failed");
                break;
            }
        }

        loop {
            match write_rx.try_recv() {
                Ok(buffer) => {
                    if let Err(e) = transport.send(&buffer) {
                        error!(error = %e, "transport write failed");
                        break 'pump;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'pump,
            }
        }

        std::thread::sleep(pump_interval);
    }

    alive.store(false, Ordering::Relaxed);
    debug!("transport worker stopped");
}
