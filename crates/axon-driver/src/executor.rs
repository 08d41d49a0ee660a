//! Single-consumer protocol engine
//!
//! The executor exclusively owns the module registry and the topology
//! graph. It runs a cooperative tick loop: per tick it performs at most
//! one drain pass over inbound chunks and one flush pass over pending
//! outbound packets, then publishes a fresh read-only snapshot. The stop
//! flag is observed once per tick, which bounds shutdown latency without
//! any blocking wait.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TryRecvError};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use axon_core::{
    CommandCode, FrameDecoder, ModuleDescriptor, ModuleId, ModuleKind, ModuleRegistry, Packet,
    TopologyGraph,
};

use crate::config::DriverConfig;

/// Source id stamped on packets the host itself sends
const HOST_ID: ModuleId = ModuleId(0);

/// Outcome of the initial discovery handshake
pub(crate) enum InitSignal {
    Ready { modules: usize },
    Timeout,
}

/// Read-only state published by the executor after every tick
#[derive(Debug, Clone, Default)]
pub struct DriverSnapshot {
    /// All known modules, sorted by id
    pub modules: Vec<ModuleDescriptor>,
    /// Whether the topology traversal currently covers every known id
    pub topology_complete: bool,
    /// Records dropped by the frame decoder
    pub decode_errors: u64,
    /// Records dropped for protocol violations
    pub protocol_errors: u64,
    /// Transport worker died outside of shutdown
    pub worker_crashed: bool,
}

pub(crate) struct ExecutorTask {
    registry: ModuleRegistry,
    topology: TopologyGraph,
    decoder: FrameDecoder,
    chunk_rx: Receiver<Vec<u8>>,
    write_tx: Sender<Vec<u8>>,
    outbound_rx: Receiver<Packet>,
    user_tx: SyncSender<Packet>,
    shared: Arc<RwLock<DriverSnapshot>>,
    ready_tx: Option<Sender<InitSignal>>,
    stop: Arc<AtomicBool>,
    transport_alive: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    config: DriverConfig,
    last_health: Option<DateTime<Utc>>,
    last_topology_poll: Option<DateTime<Utc>>,
    dispatch_protocol_errors: u64,
    crash_latched: bool,
}

impl ExecutorTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: DriverConfig,
        chunk_rx: Receiver<Vec<u8>>,
        write_tx: Sender<Vec<u8>>,
        outbound_rx: Receiver<Packet>,
        user_tx: SyncSender<Packet>,
        shared: Arc<RwLock<DriverSnapshot>>,
        ready_tx: Sender<InitSignal>,
        stop: Arc<AtomicBool>,
        transport_alive: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry: ModuleRegistry::new(),
            topology: TopologyGraph::new(),
            decoder: FrameDecoder::new(),
            chunk_rx,
            write_tx,
            outbound_rx,
            user_tx,
            shared,
            ready_tx: Some(ready_tx),
            stop,
            transport_alive,
            paused,
            config,
            last_health: None,
            last_topology_poll: None,
            dispatch_protocol_errors: 0,
            crash_latched: false,
        }
    }

    /// Run the discovery handshake, then tick until cancelled
    pub(crate) fn run(mut self) {
        self.init_modules();
        while !self.stop.load(Ordering::Relaxed) {
            self.tick();
            std::thread::sleep(self.config.tick_interval());
        }
        debug!("executor stopped");
    }

    /// Discovery handshake: broadcast a discovery ping, then collect
    /// announces for a bounded window. Readiness is signaled when the
    /// expected module count is reached or the window elapses, whichever
    /// comes first; an empty registry at window end signals timeout.
    fn init_modules(&mut self) {
        info!(window_ms = self.config.init_window_ms, "initializing bus modules");
        self.send_packet(&Packet::discovery_request(HOST_ID));

        let deadline = Utc::now() + ChronoDuration::milliseconds(self.config.init_window_ms as i64);
        while Utc::now() < deadline && !self.stop.load(Ordering::Relaxed) {
            self.tick();
            if let Some(expected) = self.config.expected_modules {
                if self.registry.len() >= expected {
                    debug!(expected, "expected module count reached");
                    break;
                }
            }
            std::thread::sleep(self.config.tick_interval());
        }

        let signal = if self.registry.is_empty() {
            warn!("no module announced within the discovery window");
            InitSignal::Timeout
        } else {
            info!(modules = self.registry.len(), "bus modules initialized");
            InitSignal::Ready {
                modules: self.registry.len(),
            }
        };
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(signal);
        }
    }

    /// One cooperative pass: watchdog, inbound drain, outbound flush,
    /// periodic polls, liveness sweep, snapshot publish
    pub(crate) fn tick(&mut self) {
        let now = Utc::now();
        self.check_transport_worker();

        loop {
            match self.chunk_rx.try_recv() {
                Ok(chunk) => {
                    for packet in self.decoder.push(&chunk, Utc::now()) {
                        self.dispatch(packet);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        loop {
            match self.outbound_rx.try_recv() {
                Ok(packet) => self.send_packet(&packet),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if !self.paused.load(Ordering::Relaxed) {
            if self.due(self.last_health, self.config.health_interval_ms, now) {
                self.send_packet(&Packet::health_check(HOST_ID));
                self.last_health = Some(now);
            }
            if self.due(self.last_topology_poll, self.config.topology_interval_ms, now) {
                self.send_packet(&Packet::topology_request(HOST_ID, ModuleId::BROADCAST));
                self.last_topology_poll = Some(now);
            }
        }

        for id in self
            .registry
            .sweep_stale(self.config.liveness_timeout_ms, now)
        {
            warn!(module = %id, "module liveness timeout, marking disconnected");
        }

        self.publish(now);
    }

    fn due(&self, last: Option<DateTime<Utc>>, interval_ms: i64, now: DateTime<Utc>) -> bool {
        last.map_or(true, |at| (now - at).num_milliseconds() >= interval_ms)
    }

    /// Watchdog over the transport-owning worker
    fn check_transport_worker(&mut self) {
        if self.crash_latched || self.stop.load(Ordering::Relaxed) {
            return;
        }
        if !self.transport_alive.load(Ordering::Relaxed) {
            self.crash_latched = true;
            error!("transport worker died unexpectedly");
            if self.config.fail_fast {
                std::process::abort();
            }
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        let at = packet.received_at.unwrap_or_else(Utc::now);
        if self.config.verbose {
            debug!(
                command = ?packet.command,
                source = %packet.source,
                destination = %packet.destination,
                len = packet.data.len(),
                "packet received"
            );
        }

        // Tee for the facade's raw recv escape hatch; dropped when full
        let _ = self.user_tx.try_send(packet.clone());

        match packet.command {
            CommandCode::ModuleAnnounce => match packet.decode_announce() {
                Some((kind_code, uuid)) => match ModuleKind::from_code(kind_code) {
                    Some(kind) => {
                        let newly = self.registry.upsert_announce(packet.source, kind, uuid, at);
                        if newly {
                            info!(module = %packet.source, ?kind, "module joined the bus");
                            self.send_packet(&Packet::topology_request(HOST_ID, packet.source));
                        }
                    }
                    None => self.protocol_violation(&packet, "unknown module kind code"),
                },
                // An empty announce is the host's own discovery ping
                None if packet.data.is_empty() => {}
                None => self.protocol_violation(&packet, "announce payload too short"),
            },
            CommandCode::PropertyValue => match packet.decode_property() {
                Some((property, value)) => {
                    self.registry
                        .update_property(packet.source, property, value, at);
                }
                None => self.protocol_violation(&packet, "property payload too short"),
            },
            CommandCode::TopologyResponse => match packet.decode_neighbors() {
                Some(neighbors) => {
                    self.topology.apply_claims(packet.source, neighbors, at);
                    self.registry.update_neighbors(packet.source, neighbors, at);
                }
                None => self.protocol_violation(&packet, "topology payload too short"),
            },
            CommandCode::PropertyGet
            | CommandCode::PropertySet
            | CommandCode::HealthCheck
            | CommandCode::TopologyRequest => {
                self.registry.touch(packet.source, at);
            }
        }
    }

    fn protocol_violation(&mut self, packet: &Packet, what: &str) {
        self.dispatch_protocol_errors += 1;
        warn!(
            command = ?packet.command,
            source = %packet.source,
            len = packet.data.len(),
            "{what}, dropping packet"
        );
    }

    fn send_packet(&mut self, packet: &Packet) {
        // A send failure means the worker is gone; the watchdog latches it
        let _ = self.write_tx.send(packet.encode_line().into_bytes());
    }

    fn publish(&mut self, now: DateTime<Utc>) {
        let root = self.registry.network_root();
        let ids = self.registry.ids();
        let snapshot = DriverSnapshot {
            modules: self.registry.snapshot(),
            topology_complete: self.topology.is_complete(
                root,
                &ids,
                self.config.topology_quiet_ms,
                now,
            ),
            decode_errors: self.decoder.decode_errors(),
            protocol_errors: self.decoder.protocol_errors() + self.dispatch_protocol_errors,
            worker_crashed: self.crash_latched,
        };
        *self.shared.write().expect("snapshot lock poisoned") = snapshot;
    }
}
