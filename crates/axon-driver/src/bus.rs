//! Public facade over the driver
//!
//! A `Bus` owns the transport worker and the executor, sequences startup
//! (spawn both, block bounded on the readiness signal) and shutdown
//! (cooperative cancellation, joins with a deadline), and serves typed,
//! read-only views of the module registry. The calling thread never
//! touches the transport; its only paths into the workers are the
//! outbound packet queue and the published snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use axon_core::{
    render_module_map, ModuleDescriptor, ModuleId, ModuleKind, Packet, PropertyId,
};
use axon_transport::{SerialTransport, Transport, TransportError};

use crate::config::{ConnMode, DriverConfig};
use crate::executor::{DriverSnapshot, ExecutorTask, InitSignal};
use crate::worker::run_transport_worker;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Readiness was not signaled within the deadline. The registry
    /// state collected so far is carried along for inspection.
    #[error("module initialization timed out after {elapsed_ms} ms")]
    InitializationTimeout {
        elapsed_ms: u64,
        partial: Vec<ModuleDescriptor>,
    },
    #[error("transport worker crashed")]
    WorkerCrashed,
    #[error("bus is closed")]
    Closed,
}

/// Construction options for [`Bus::connect`]
#[derive(Debug, Clone, Default)]
pub struct BusOptions {
    pub mode: ConnMode,
    /// Explicit serial device; discovered by hardware signature if unset
    pub port: Option<String>,
    /// Peripheral identity for wireless modes
    pub uuid: Option<String>,
    /// Log every dispatched packet at debug level
    pub verbose: bool,
}

type Connector = Box<dyn FnMut() -> Result<Box<dyn Transport>, TransportError> + Send>;

struct Workers {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    executor: JoinHandle<()>,
    transport: JoinHandle<()>,
    outbound_tx: Sender<Packet>,
    user_rx: Receiver<Packet>,
}

/// Entry point to the driver
pub struct Bus {
    config: DriverConfig,
    connector: Connector,
    shared: Arc<RwLock<DriverSnapshot>>,
    workers: Option<Workers>,
}

impl Bus {
    /// Connect using the given options and mode-dependent defaults
    pub fn connect(options: BusOptions) -> Result<Self, DriverError> {
        let mut config = DriverConfig::for_mode(options.mode);
        config.verbose = options.verbose;
        Self::connect_with_config(options, config)
    }

    /// Connect with an explicit configuration
    pub fn connect_with_config(
        options: BusOptions,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let connector: Connector = match options.mode {
            ConnMode::Serial => {
                let port = options.port.clone();
                Box::new(move || {
                    let transport = match &port {
                        Some(path) => SerialTransport::open(path)?,
                        None => SerialTransport::open_auto()?,
                    };
                    Ok(Box::new(transport) as Box<dyn Transport>)
                })
            }
            ConnMode::Can => Box::new(|| Err(TransportError::Unsupported("can"))),
            ConnMode::Ble => Box::new(|| Err(TransportError::Unsupported("ble"))),
        };
        Self::from_connector(connector, config)
    }

    /// Run the driver over an injected transport. Used by tests and by
    /// callers bringing their own link; such a bus cannot be re-opened
    /// after `close`.
    pub fn with_transport(
        transport: Box<dyn Transport>,
        config: DriverConfig,
    ) -> Result<Self, DriverError> {
        let mut slot = Some(transport);
        let connector: Connector = Box::new(move || {
            slot.take()
                .ok_or(TransportError::Unsupported("injected transport already consumed"))
        });
        Self::from_connector(connector, config)
    }

    fn from_connector(connector: Connector, config: DriverConfig) -> Result<Self, DriverError> {
        let mut bus = Self {
            config,
            connector,
            shared: Arc::new(RwLock::new(DriverSnapshot::default())),
            workers: None,
        };
        bus.open()?;
        Ok(bus)
    }

    /// Start the worker set and block until the bus is ready. Calling
    /// `open` on an already-open bus is a no-op.
    pub fn open(&mut self) -> Result<(), DriverError> {
        if self.workers.is_some() {
            return Ok(());
        }
        let transport = (self.connector)()?;
        *self.shared.write().expect("snapshot lock poisoned") = DriverSnapshot::default();

        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let transport_alive = Arc::new(AtomicBool::new(true));

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>();
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Packet>();
        let (user_tx, user_rx) = mpsc::sync_channel::<Packet>(self.config.user_queue_depth);
        let (ready_tx, ready_rx) = mpsc::channel::<InitSignal>();

        let transport_handle = std::thread::Builder::new()
            .name("axon-transport".into())
            .spawn({
                let stop = stop.clone();
                let alive = transport_alive.clone();
                let interval = self.config.tick_interval();
                move || run_transport_worker(transport, chunk_tx, write_rx, stop, alive, interval)
            })
            .map_err(TransportError::Io)?;

        let executor = ExecutorTask::new(
            self.config.clone(),
            chunk_rx,
            write_tx,
            outbound_rx,
            user_tx,
            self.shared.clone(),
            ready_tx,
            stop.clone(),
            transport_alive,
            paused.clone(),
        );
        let executor_handle = std::thread::Builder::new()
            .name("axon-executor".into())
            .spawn(move || executor.run())
            .map_err(TransportError::Io)?;

        // Bounded wait: the executor signals within its discovery window,
        // the extra second covers scheduling slack
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.init_window_ms + 1_000);
        match ready_rx.recv_timeout(deadline) {
            Ok(InitSignal::Ready { modules }) => {
                info!(modules, "bus ready");
                self.workers = Some(Workers {
                    stop,
                    paused,
                    executor: executor_handle,
                    transport: transport_handle,
                    outbound_tx,
                    user_rx,
                });
                Ok(())
            }
            Ok(InitSignal::Timeout) | Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                stop.store(true, Ordering::Relaxed);
                join_with_deadline(executor_handle, self.config.join_timeout_ms, "executor");
                join_with_deadline(transport_handle, self.config.join_timeout_ms, "transport");
                let partial = self.shared.read().expect("snapshot lock poisoned").modules.clone();
                Err(DriverError::InitializationTimeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    partial,
                })
            }
        }
    }

    /// Cancel the workers, join them with a deadline and release the
    /// transport. Calling `close` twice is a no-op.
    pub fn close(&mut self) {
        let Some(workers) = self.workers.take() else {
            debug!("close on an already-closed bus");
            return;
        };
        info!("closing bus");
        workers.stop.store(true, Ordering::Relaxed);
        join_with_deadline(workers.executor, self.config.join_timeout_ms, "executor");
        join_with_deadline(workers.transport, self.config.join_timeout_ms, "transport");
    }

    /// Whether the worker set is currently running
    pub fn is_open(&self) -> bool {
        self.workers.is_some()
    }

    /// Current published snapshot of the driver state
    pub fn snapshot(&self) -> DriverSnapshot {
        self.shared.read().expect("snapshot lock poisoned").clone()
    }

    /// All known modules, sorted by id
    pub fn modules(&self) -> Vec<ModuleDescriptor> {
        self.snapshot().modules
    }

    fn by_kind(&self, kind: ModuleKind) -> Vec<ModuleDescriptor> {
        self.snapshot()
            .modules
            .into_iter()
            .filter(|m| m.kind == Some(kind))
            .collect()
    }

    pub fn networks(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Network)
    }

    pub fn buttons(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Button)
    }

    pub fn dials(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Dial)
    }

    pub fn envs(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Env)
    }

    pub fn gyros(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Gyro)
    }

    pub fn irs(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Ir)
    }

    pub fn leds(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Led)
    }

    pub fn mics(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Mic)
    }

    pub fn motors(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Motor)
    }

    pub fn speakers(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Speaker)
    }

    pub fn ultrasonics(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Ultrasonic)
    }

    pub fn displays(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::Display)
    }

    pub fn ai_cameras(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::AiCamera)
    }

    pub fn ai_speakers(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::AiSpeaker)
    }

    pub fn ai_mics(&self) -> Vec<ModuleDescriptor> {
        self.by_kind(ModuleKind::AiMic)
    }

    pub fn is_topology_complete(&self) -> bool {
        self.snapshot().topology_complete
    }

    /// Running counters of dropped records: (decode failures, protocol
    /// violations)
    pub fn error_counters(&self) -> (u64, u64) {
        let snapshot = self.snapshot();
        (snapshot.decode_errors, snapshot.protocol_errors)
    }

    /// Render the discovered topology as an ASCII map
    pub fn topology_map(&self, include_ids: bool) -> String {
        render_module_map(&self.snapshot().modules, include_ids)
    }

    pub fn print_topology_map(&self, include_ids: bool) {
        print!("{}", self.topology_map(include_ids));
    }

    /// Low-level escape hatch: enqueue one raw packet for sending
    pub fn send(&mut self, packet: &Packet) -> Result<(), DriverError> {
        if self.snapshot().worker_crashed {
            return Err(DriverError::WorkerCrashed);
        }
        let workers = self.workers.as_ref().ok_or(DriverError::Closed)?;
        workers
            .outbound_tx
            .send(packet.clone())
            .map_err(|_| DriverError::WorkerCrashed)
    }

    /// Low-level escape hatch: pop the next inbound packet, if any
    pub fn recv(&mut self) -> Option<Packet> {
        self.workers.as_ref()?.user_rx.try_recv().ok()
    }

    /// Block until a cached value exists for (module, property) or the
    /// timeout elapses
    pub fn wait_for_property(
        &self,
        id: ModuleId,
        property: PropertyId,
        timeout: Duration,
    ) -> Option<f32> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot();
            if let Some(entry) = snapshot
                .modules
                .iter()
                .find(|m| m.id == id)
                .and_then(|m| m.property(property))
            {
                return Some(entry.value);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(self.config.tick_interval());
        }
    }

    /// Suspend outbound health/topology polling, e.g. around a firmware
    /// flashing session that needs the bus to itself
    pub fn pause_polling(&self) {
        if let Some(workers) = &self.workers {
            workers.paused.store(true, Ordering::Relaxed);
            info!("outbound polling paused");
        }
    }

    /// Resume outbound polling after [`Bus::pause_polling`]
    pub fn resume_polling(&self) {
        if let Some(workers) = &self.workers {
            workers.paused.store(false, Ordering::Relaxed);
            info!("outbound polling resumed");
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Join a worker, detaching with a warning if it misses the deadline
fn join_with_deadline(handle: JoinHandle<()>, timeout_ms: u64, name: &str) {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(worker = name, "worker did not stop within the deadline, detaching");
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        warn!(worker = name, "worker panicked");
    }
}
