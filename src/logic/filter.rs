//! Packet Filter
//!
//! Stateless predicate built from `FilterRules`. Applied inside every adapter
//! before an event leaves it.

use std::collections::BTreeSet;

use crate::logic::config::FilterRules;
use crate::logic::event::{PacketInfo, TransportProtocol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    protocols: BTreeSet<TransportProtocol>,
    ports: BTreeSet<u16>,
    min_packet_size: u32,
}

impl Filter {
    pub fn from_rules(rules: &FilterRules) -> Self {
        Self {
            protocols: rules.protocols.clone(),
            ports: rules.ports.clone(),
            min_packet_size: rules.min_packet_size,
        }
    }

    pub fn matches(&self, packet: &PacketInfo) -> bool {
        if !self.protocols.is_empty() && !self.protocols.contains(&packet.protocol) {
            return false;
        }

        if !self.ports.is_empty() {
            let hit = [packet.src_port, packet.dst_port]
                .iter()
                .flatten()
                .any(|port| self.ports.contains(port));
            if !hit {
                return false;
            }
        }

        packet.size >= self.min_packet_size
    }

    /// BPF expression for capture backends, e.g. `(tcp or udp) and (port 80)`.
    /// Size is not expressed here; it is always checked by `matches`.
    pub fn bpf_expression(&self) -> String {
        let mut clauses = Vec::new();

        let protocols: Vec<&str> = self
            .protocols
            .iter()
            .filter_map(TransportProtocol::bpf_keyword)
            .collect();
        if !protocols.is_empty() {
            clauses.push(format!("({})", protocols.join(" or ")));
        }

        if !self.ports.is_empty() {
            let ports: Vec<String> = self.ports.iter().map(|p| format!("port {}", p)).collect();
            clauses.push(format!("({})", ports.join(" or ")));
        }

        clauses.join(" and ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(size: u32, src: u16, dst: u16) -> PacketInfo {
        PacketInfo::new("10.0.0.1", "10.0.0.2", TransportProtocol::Tcp, size).with_ports(src, dst)
    }

    #[test]
    fn test_default_rules_accept_everything_known() {
        let filter = Filter::from_rules(&FilterRules::default());
        assert!(filter.matches(&tcp(40, 1234, 80)));
        assert!(filter.matches(&PacketInfo::new("a", "b", TransportProtocol::Icmp, 64)));
        // OTHER is not in the default protocol set
        assert!(!filter.matches(&PacketInfo::new("a", "b", TransportProtocol::Other, 64)));
    }

    #[test]
    fn test_protocol_filter() {
        let rules = FilterRules {
            protocols: [TransportProtocol::Udp].into_iter().collect(),
            ..Default::default()
        };
        let filter = Filter::from_rules(&rules);
        assert!(!filter.matches(&tcp(100, 1, 2)));
        assert!(filter.matches(&PacketInfo::new("a", "b", TransportProtocol::Udp, 100)));
    }

    #[test]
    fn test_port_filter_matches_either_side() {
        let rules = FilterRules {
            ports: [443].into_iter().collect(),
            ..Default::default()
        };
        let filter = Filter::from_rules(&rules);
        assert!(filter.matches(&tcp(100, 443, 50000)));
        assert!(filter.matches(&tcp(100, 50000, 443)));
        assert!(!filter.matches(&tcp(100, 80, 8080)));
        // No ports at all (ICMP) cannot match a port filter
        assert!(!filter.matches(&PacketInfo::new("a", "b", TransportProtocol::Icmp, 100)));
    }

    #[test]
    fn test_min_packet_size() {
        let rules = FilterRules {
            min_packet_size: 500,
            ..Default::default()
        };
        let filter = Filter::from_rules(&rules);
        assert!(!filter.matches(&tcp(499, 1, 2)));
        assert!(filter.matches(&tcp(500, 1, 2)));
    }

    #[test]
    fn test_bpf_expression() {
        let rules = FilterRules {
            protocols: [TransportProtocol::Tcp, TransportProtocol::Udp].into_iter().collect(),
            ports: [80, 443].into_iter().collect(),
            min_packet_size: 0,
        };
        assert_eq!(
            Filter::from_rules(&rules).bpf_expression(),
            "(tcp or udp) and (port 80 or port 443)"
        );
        let open = FilterRules {
            protocols: Default::default(),
            ports: Default::default(),
            min_packet_size: 0,
        };
        assert_eq!(Filter::from_rules(&open).bpf_expression(), "");
    }
}
