//! Serial-port discovery for the network-bridge module
//!
//! Candidates are selected by USB identity: either the bridge's vid/pid
//! pair or a product/manufacturer/description string carrying the bridge
//! marker. The reported strings differ across operating systems, so all
//! three are checked.

use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, info};

use crate::TransportError;

/// USB vendor id of the network-bridge module
pub const BRIDGE_VID: u16 = 0x2FDE;
/// USB product id of the network-bridge module
pub const BRIDGE_PID: u16 = 0x0002;
/// Marker present in the bridge's product/description strings
const BRIDGE_MARKER: &str = "Network Module";

/// Check whether one enumerated port looks like the bridge
pub fn matches_bridge(port: &SerialPortInfo) -> bool {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            if usb.vid == BRIDGE_VID && usb.pid == BRIDGE_PID {
                return true;
            }
            usb.product
                .as_deref()
                .map(|s| s.contains(BRIDGE_MARKER))
                .unwrap_or(false)
                || usb
                    .manufacturer
                    .as_deref()
                    .map(|s| s.contains(BRIDGE_MARKER))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

/// Pick the first bridge candidate from an enumerated port list
pub fn find_bridge_port(ports: &[SerialPortInfo]) -> Option<&SerialPortInfo> {
    ports.iter().find(|p| matches_bridge(p))
}

/// Enumerate system serial ports and return the bridge's device path
pub fn discover_bridge_port() -> Result<String, TransportError> {
    let ports = serialport::available_ports()?;
    debug!(count = ports.len(), "enumerated serial ports");
    match find_bridge_port(&ports) {
        Some(port) => {
            info!(port = %port.port_name, "found bridge module");
            Ok(port.port_name.clone())
        }
        None => Err(TransportError::NoDeviceFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb_port(name: &str, vid: u16, pid: u16, product: Option<&str>) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: product.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_matches_by_vid_pid() {
        let port = usb_port("/dev/ttyUSB0", BRIDGE_VID, BRIDGE_PID, None);
        assert!(matches_bridge(&port));
    }

    #[test]
    fn test_matches_by_product_marker() {
        let port = usb_port("/dev/ttyACM1", 0x1234, 0x0001, Some("Axon Network Module"));
        assert!(matches_bridge(&port));
    }

    #[test]
    fn test_skips_unrelated_ports() {
        let ports = vec![
            usb_port("/dev/ttyUSB0", 0x0403, 0x6001, Some("FT232R USB UART")),
            SerialPortInfo {
                port_name: "/dev/ttyS0".to_string(),
                port_type: SerialPortType::Unknown,
            },
            usb_port("/dev/ttyACM0", BRIDGE_VID, BRIDGE_PID, None),
        ];
        let found = find_bridge_port(&ports).unwrap();
        assert_eq!(found.port_name, "/dev/ttyACM0");
    }

    #[test]
    fn test_no_candidates() {
        let ports = vec![usb_port("/dev/ttyUSB0", 0x0403, 0x6001, None)];
        assert!(find_bridge_port(&ports).is_none());
    }
}
