//! End-to-end driver tests over the in-memory transport
//!
//! These run the real worker threads: chunks pushed through the mock
//! handle flow through the transport worker, the frame decoder and the
//! executor before they surface in the published snapshot.

use std::time::{Duration, Instant};

use axon_core::module::property;
use axon_core::{CommandCode, ModuleId, ModuleKind, Packet};
use axon_driver::{Bus, DriverConfig, DriverError};
use axon_transport::MockTransport;

fn test_config() -> DriverConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = DriverConfig::default();
    config.init_window_ms = 2_000;
    config.topology_quiet_ms = 10;
    config.fail_fast = false;
    config
}

/// Poll `check` until it holds or the deadline elapses
fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

/// A bridge module with one button attached to its right side
fn preload_two_module_chain(handle: &axon_transport::MockHandle) {
    handle.push(Packet::module_announce(ModuleId(1), ModuleKind::Network, 0x11).encode_line());
    handle.push(Packet::module_announce(ModuleId(2), ModuleKind::Button, 0x22).encode_line());
    handle.push(
        Packet::topology_response(ModuleId(1), [Some(ModuleId(2)), None, None, None]).encode_line(),
    );
    handle.push(
        Packet::topology_response(ModuleId(2), [None, None, Some(ModuleId(1)), None]).encode_line(),
    );
}

#[test]
fn test_connect_discovers_modules_and_topology() {
    let (transport, handle) = MockTransport::new();
    preload_two_module_chain(&handle);

    let mut config = test_config();
    config.expected_modules = Some(2);
    let mut bus = Bus::with_transport(Box::new(transport), config).unwrap();

    let modules = bus.modules();
    assert_eq!(modules.len(), 2);
    assert_eq!(bus.networks().len(), 1);
    assert_eq!(bus.buttons().len(), 1);
    assert_eq!(bus.buttons()[0].uuid, 0x22);

    assert!(wait_until(Duration::from_secs(1), || bus.is_topology_complete()));
    let map = bus.topology_map(false);
    assert!(map.contains("Network"));
    assert!(map.contains("Button"));

    // Raw send escape hatch lands on the wire as one line
    let probe = Packet::new(
        CommandCode::PropertyGet,
        ModuleId(0),
        ModuleId(2),
        vec![property::CLICKED.0],
    )
    .unwrap();
    bus.send(&probe).unwrap();
    assert!(wait_until(Duration::from_secs(1), || {
        handle.sent_lines().iter().any(|line| {
            Packet::decode_line(line, None)
                .map(|p| p.command == CommandCode::PropertyGet)
                .unwrap_or(false)
        })
    }));

    // Property reports reach both the cache and the raw recv queue
    handle.push(Packet::property_value(ModuleId(2), property::CLICKED, 1.0).encode_line());
    let value = bus.wait_for_property(ModuleId(2), property::CLICKED, Duration::from_secs(1));
    assert_eq!(value, Some(1.0));

    assert!(wait_until(Duration::from_secs(1), || {
        std::iter::from_fn(|| bus.recv())
            .any(|p| p.command == CommandCode::PropertyValue && p.source == ModuleId(2))
    }));

    bus.close();
    assert!(!bus.is_open());
    assert!(matches!(bus.send(&probe), Err(DriverError::Closed)));
    // Second close is a no-op
    bus.close();
}

#[test]
fn test_silent_bus_times_out_with_empty_partial() {
    let (transport, _handle) = MockTransport::new();
    let mut config = test_config();
    config.init_window_ms = 50;

    match Bus::with_transport(Box::new(transport), config) {
        Err(DriverError::InitializationTimeout { elapsed_ms, partial }) => {
            assert!(elapsed_ms >= 50);
            assert!(partial.is_empty());
        }
        other => panic!("expected initialization timeout, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_severed_link_surfaces_worker_crash() {
    let (transport, handle) = MockTransport::new();
    handle.push(Packet::module_announce(ModuleId(1), ModuleKind::Network, 0x11).encode_line());

    let mut config = test_config();
    config.expected_modules = Some(1);
    let mut bus = Bus::with_transport(Box::new(transport), config).unwrap();
    assert_eq!(bus.modules().len(), 1);

    handle.sever();
    assert!(wait_until(Duration::from_secs(1), || {
        bus.snapshot().worker_crashed
    }));

    let probe = Packet::health_check(ModuleId(0));
    assert!(matches!(bus.send(&probe), Err(DriverError::WorkerCrashed)));
}
