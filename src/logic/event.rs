//! Telemetry Event Types
//!
//! Data structures flowing through the pipeline.
//! No pipeline logic here - only types and small helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{HIGH_BAND_MIN, MEDIUM_BAND_MIN};

// ============================================================================
// ORIGIN & PROTOCOL
// ============================================================================

/// Which adapter produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    RealCapture,
    Simulated,
    Hybrid,
    Logs,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOrigin::RealCapture => "real_capture",
            SourceOrigin::Simulated => "simulated",
            SourceOrigin::Hybrid => "hybrid",
            SourceOrigin::Logs => "logs",
        }
    }
}

impl std::fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport protocol of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Icmp,
    /// Anything else seen on the wire; never valid in a filter
    Other,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Icmp => "ICMP",
            TransportProtocol::Other => "OTHER",
        }
    }

    /// Parse names and IP protocol numbers ("tcp", "UDP", "6", "1", ...)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TCP" | "6" => TransportProtocol::Tcp,
            "UDP" | "17" => TransportProtocol::Udp,
            "ICMP" | "1" => TransportProtocol::Icmp,
            _ => TransportProtocol::Other,
        }
    }

    /// Keyword used in a BPF expression
    pub fn bpf_keyword(&self) -> Option<&'static str> {
        match self {
            TransportProtocol::Tcp => Some("tcp"),
            TransportProtocol::Udp => Some("udp"),
            TransportProtocol::Icmp => Some("icmp"),
            TransportProtocol::Other => None,
        }
    }
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT LEVEL
// ============================================================================

/// Fixed severity bands (independent of the alert threshold)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn from_probability(probability: f32) -> Self {
        if probability >= HIGH_BAND_MIN {
            ThreatLevel::High
        } else if probability >= MEDIUM_BAND_MIN {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PACKET
// ============================================================================

/// Packet fields as they leave an adapter (addresses already masked
/// when privacy mode is on)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub src_ip: String,
    pub dst_ip: String,
    pub protocol: TransportProtocol,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default)]
    pub dst_port: Option<u16>,
    /// Bytes on the wire
    pub size: u32,
    #[serde(default)]
    pub ttl: Option<u8>,
    #[serde(default)]
    pub tcp_flags: Option<u8>,
    #[serde(default)]
    pub service: String,
}

impl PacketInfo {
    pub fn new(src_ip: &str, dst_ip: &str, protocol: TransportProtocol, size: u32) -> Self {
        Self {
            src_ip: src_ip.to_string(),
            dst_ip: dst_ip.to_string(),
            protocol,
            src_port: None,
            dst_port: None,
            size,
            ttl: None,
            tcp_flags: None,
            service: String::new(),
        }
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = Some(src_port);
        self.dst_port = Some(dst_port);
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tcp_flags(mut self, flags: u8) -> Self {
        self.tcp_flags = Some(flags);
        self
    }

    /// Fill `service` from the destination port if not set
    pub fn enriched(mut self) -> Self {
        if self.service.is_empty() {
            self.service = service_for_port(self.dst_port).to_string();
        }
        self
    }
}

/// Well-known service name for a destination port
pub fn service_for_port(port: Option<u16>) -> &'static str {
    match port {
        Some(80) => "http",
        Some(443) => "https",
        Some(22) => "ssh",
        Some(21) => "ftp",
        Some(23) => "telnet",
        Some(25) => "smtp",
        Some(53) => "dns",
        Some(110) => "pop3",
        Some(143) => "imap",
        Some(993) => "imaps",
        Some(995) => "pop3s",
        Some(3306) => "mysql",
        _ => "other",
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classifier output attached to an event; all fields absent = unclassified
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub probability: Option<f32>,
    pub prediction: Option<bool>,
    pub threat_level: Option<ThreatLevel>,
}

impl Classification {
    pub fn scored(probability: f32, prediction: bool) -> Self {
        Self {
            probability: Some(probability),
            prediction: Some(prediction),
            threat_level: None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.probability.is_some()
    }
}

// ============================================================================
// NETWORK EVENT
// ============================================================================

/// One classified (or unclassified) observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// Pipeline sequence number (arrival order)
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: SourceOrigin,
    /// Revision of the config the adapter produced this under
    pub config_revision: u64,
    pub packet: PacketInfo,
    pub classification: Classification,
}

impl NetworkEvent {
    pub fn new(id: u64, origin: SourceOrigin, config_revision: u64, packet: PacketInfo) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            origin,
            config_revision,
            packet,
            classification: Classification::default(),
        }
    }

    pub fn is_classified(&self) -> bool {
        self.classification.is_classified()
    }
}

// ============================================================================
// ALERT
// ============================================================================

/// Alert raised for one qualifying event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub threat_level: ThreatLevel,
    pub probability: f32,
    pub message: String,
    pub origin: SourceOrigin,
    pub packet: PacketInfo,
}

impl Alert {
    pub fn for_event(event: &NetworkEvent, probability: f32, threat_level: ThreatLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id,
            timestamp: Utc::now(),
            threat_level,
            probability,
            message: format!(
                "Threat detected in {} data! Probability: {:.2}%",
                event.origin,
                probability * 100.0
            ),
            origin: event.origin,
            packet: event.packet.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_bands() {
        assert_eq!(ThreatLevel::from_probability(0.95), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_probability(0.7), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_probability(0.69), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_probability(0.3), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_probability(0.29), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_probability(0.0), ThreatLevel::Low);
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(TransportProtocol::parse("tcp"), TransportProtocol::Tcp);
        assert_eq!(TransportProtocol::parse("17"), TransportProtocol::Udp);
        assert_eq!(TransportProtocol::parse(" ICMP "), TransportProtocol::Icmp);
        assert_eq!(TransportProtocol::parse("gre"), TransportProtocol::Other);
    }

    #[test]
    fn test_service_enrichment() {
        let packet = PacketInfo::new("1.1.1.1", "2.2.2.2", TransportProtocol::Tcp, 60)
            .with_ports(50000, 22)
            .enriched();
        assert_eq!(packet.service, "ssh");

        let unknown = PacketInfo::new("1.1.1.1", "2.2.2.2", TransportProtocol::Udp, 60)
            .with_ports(1, 9999)
            .enriched();
        assert_eq!(unknown.service, "other");
    }

    #[test]
    fn test_alert_message() {
        let packet = PacketInfo::new("10.0.xxx.xxx", "10.1.xxx.xxx", TransportProtocol::Tcp, 900);
        let event = NetworkEvent::new(7, SourceOrigin::Simulated, 1, packet);
        let alert = Alert::for_event(&event, 0.8532, ThreatLevel::High);

        assert_eq!(alert.event_id, 7);
        assert_eq!(alert.message, "Threat detected in simulated data! Probability: 85.32%");
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&SourceOrigin::RealCapture).unwrap();
        assert_eq!(json, "\"real_capture\"");
        let json = serde_json::to_string(&ThreatLevel::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
        let proto: TransportProtocol = serde_json::from_str("\"UDP\"").unwrap();
        assert_eq!(proto, TransportProtocol::Udp);
    }
}
