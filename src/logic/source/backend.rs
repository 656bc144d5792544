//! Capture Backend
//!
//! Host-facing seam for live capture. `SysinfoBackend` enumerates interfaces
//! only; with the `pcap` feature `PcapBackend` also reads packets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::Networks;

use crate::logic::error::SourceError;
use crate::logic::event::PacketInfo;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One host network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub address: Option<String>,
    pub hardware_address: Option<String>,
    pub is_up: bool,
}

impl InterfaceInfo {
    fn is_loopback(&self) -> bool {
        self.name == "lo"
            || self.name.starts_with("lo0")
            || self.name.to_ascii_lowercase().contains("loopback")
            || self
                .address
                .as_deref()
                .is_some_and(|a| a.starts_with("127.") || a == "::1")
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// An opened live feed
pub trait PacketStream: Send {
    /// Next packet; `Ok(None)` when the read timed out with nothing to show
    fn next_packet(&mut self) -> Result<Option<PacketInfo>, SourceError>;
}

pub trait CaptureBackend: Send + Sync {
    fn list_interfaces(&self) -> Vec<InterfaceInfo>;

    /// First interface that is up and not loopback
    fn default_interface(&self) -> Option<String> {
        let interfaces = self.list_interfaces();
        interfaces
            .iter()
            .find(|i| i.is_up && !i.is_loopback())
            .or_else(|| interfaces.iter().find(|i| i.is_up))
            .map(|i| i.name.clone())
    }

    /// Open `interface` with a BPF capture filter (empty = capture all)
    fn open(&self, interface: &str, bpf: &str) -> Result<Box<dyn PacketStream>, SourceError>;
}

/// Backend used by the daemon
#[cfg(feature = "pcap")]
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(pcap_backend::PcapBackend)
}

/// Backend used by the daemon
#[cfg(not(feature = "pcap"))]
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(SysinfoBackend)
}

// ============================================================================
// SYSINFO BACKEND
// ============================================================================

/// Interface listing through sysinfo; cannot read packets
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoBackend;

impl CaptureBackend for SysinfoBackend {
    fn list_interfaces(&self) -> Vec<InterfaceInfo> {
        let networks = Networks::new_with_refreshed_list();
        let mut interfaces: Vec<InterfaceInfo> = networks
            .iter()
            .map(|(name, data)| {
                let mac = data.mac_address();
                let address = data
                    .ip_networks()
                    .iter()
                    .find(|net| net.addr.is_ipv4())
                    .or_else(|| data.ip_networks().first())
                    .map(|net| net.addr.to_string());
                InterfaceInfo {
                    name: name.to_string(),
                    is_up: address.is_some(),
                    address,
                    hardware_address: if mac.is_unspecified() {
                        None
                    } else {
                        Some(mac.to_string())
                    },
                }
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        interfaces
    }

    fn open(&self, interface: &str, _bpf: &str) -> Result<Box<dyn PacketStream>, SourceError> {
        Err(SourceError::Unavailable(format!(
            "live capture on '{}' needs the pcap feature",
            interface
        )))
    }
}

// ============================================================================
// PCAP BACKEND
// ============================================================================

#[cfg(feature = "pcap")]
pub use pcap_backend::PcapBackend;

#[cfg(feature = "pcap")]
mod pcap_backend {
    use etherparse::{NetSlice, SlicedPacket, TransportSlice};
    use pcap::{Active, Capture, Device};

    use super::{CaptureBackend, InterfaceInfo, PacketStream, SysinfoBackend};
    use crate::constants::CAPTURE_READ_TIMEOUT_MS;
    use crate::logic::error::SourceError;
    use crate::logic::event::{PacketInfo, TransportProtocol};

    /// libpcap capture; interface details from libpcap, MACs from sysinfo
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PcapBackend;

    impl CaptureBackend for PcapBackend {
        fn list_interfaces(&self) -> Vec<InterfaceInfo> {
            let hardware: Vec<InterfaceInfo> = SysinfoBackend.list_interfaces();
            let devices = match Device::list() {
                Ok(devices) => devices,
                Err(e) => {
                    log::warn!("pcap device listing failed ({}), using sysinfo", e);
                    return hardware;
                }
            };

            devices
                .into_iter()
                .map(|device| {
                    let address = device
                        .addresses
                        .iter()
                        .find(|a| a.addr.is_ipv4())
                        .or_else(|| device.addresses.first())
                        .map(|a| a.addr.to_string());
                    let hardware_address = hardware
                        .iter()
                        .find(|h| h.name == device.name)
                        .and_then(|h| h.hardware_address.clone());
                    InterfaceInfo {
                        is_up: device.flags.is_up(),
                        name: device.name,
                        address,
                        hardware_address,
                    }
                })
                .collect()
        }

        fn open(&self, interface: &str, bpf: &str) -> Result<Box<dyn PacketStream>, SourceError> {
            let mut capture = Capture::from_device(interface)
                .and_then(|d| {
                    d.promisc(true)
                        .timeout(CAPTURE_READ_TIMEOUT_MS)
                        .snaplen(65535)
                        .open()
                })
                .map_err(|e| SourceError::Unavailable(format!("{}: {}", interface, e)))?;

            if !bpf.is_empty() {
                capture
                    .filter(bpf, true)
                    .map_err(|e| SourceError::Unavailable(format!("bad filter '{}': {}", bpf, e)))?;
            }

            log::info!("pcap opened on {} (filter: '{}')", interface, bpf);
            Ok(Box::new(PcapStream { capture }))
        }
    }

    struct PcapStream {
        capture: Capture<Active>,
    }

    impl PacketStream for PcapStream {
        fn next_packet(&mut self) -> Result<Option<PacketInfo>, SourceError> {
            match self.capture.next_packet() {
                Ok(packet) => Ok(parse_frame(packet.data, packet.header.len)),
                Err(pcap::Error::TimeoutExpired) => Ok(None),
                Err(e) => Err(SourceError::Read(e.to_string())),
            }
        }
    }

    /// Ethernet frame -> packet fields; non-IP frames are skipped
    pub(super) fn parse_frame(data: &[u8], wire_len: u32) -> Option<PacketInfo> {
        let sliced = SlicedPacket::from_ethernet(data).ok()?;

        let (src_ip, dst_ip, ttl, protocol) = match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => {
                let header = ipv4.header();
                (
                    header.source_addr().to_string(),
                    header.destination_addr().to_string(),
                    header.ttl(),
                    header.protocol().0,
                )
            }
            Some(NetSlice::Ipv6(ipv6)) => {
                let header = ipv6.header();
                (
                    header.source_addr().to_string(),
                    header.destination_addr().to_string(),
                    header.hop_limit(),
                    header.next_header().0,
                )
            }
            _ => return None,
        };

        let protocol = TransportProtocol::parse(&protocol.to_string());
        let mut packet = PacketInfo::new(&src_ip, &dst_ip, protocol, wire_len).with_ttl(ttl);

        match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => {
                packet = packet.with_ports(tcp.source_port(), tcp.destination_port());
                let flags = (tcp.fin() as u8)
                    | (tcp.syn() as u8) << 1
                    | (tcp.rst() as u8) << 2
                    | (tcp.psh() as u8) << 3
                    | (tcp.ack() as u8) << 4
                    | (tcp.urg() as u8) << 5
                    | (tcp.ece() as u8) << 6
                    | (tcp.cwr() as u8) << 7;
                packet = packet.with_tcp_flags(flags);
            }
            Some(TransportSlice::Udp(udp)) => {
                packet = packet.with_ports(udp.source_port(), udp.destination_port());
            }
            _ => {}
        }

        Some(packet)
    }

}
