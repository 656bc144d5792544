//! Synthetic Traffic
//!
//! Plausible LAN traffic with a minority of suspicious-looking packets.
//! Reproducible when seeded.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{Emit, Emitter, SourceOutcome, StopSignal};
use crate::logic::config::SimulationSettings;
use crate::logic::event::{PacketInfo, TransportProtocol};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Share of generated packets that look like an attack
const SUSPICIOUS_RATIO: f64 = 0.15;

const COMMON_PORTS: [u16; 10] = [80, 443, 22, 21, 25, 53, 110, 143, 993, 995];

const PROTOCOLS: [TransportProtocol; 3] = [
    TransportProtocol::Tcp,
    TransportProtocol::Udp,
    TransportProtocol::Icmp,
];

/// SYN, SYN+ACK, PSH+ACK
const SUSPICIOUS_TCP_FLAGS: [u8; 3] = [2, 18, 24];

// ============================================================================
// GENERATOR
// ============================================================================

pub struct TrafficGenerator {
    rng: StdRng,
}

impl TrafficGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn next_packet(&mut self) -> PacketInfo {
        let rng = &mut self.rng;
        let suspicious = rng.gen_bool(SUSPICIOUS_RATIO);

        let src_ip = format!("192.168.1.{}", rng.gen_range(1..=254));
        let dst_ip = format!("10.0.0.{}", rng.gen_range(1..=254));
        let protocol = PROTOCOLS[rng.gen_range(0..PROTOCOLS.len())];
        let ttl = rng.gen_range(32..=128u8);

        let (size, src_port, dst_port) = if suspicious {
            (
                rng.gen_range(1000..=8000u32),
                rng.gen_range(1..1024u16),
                rng.gen_range(1..1024u16),
            )
        } else {
            (
                rng.gen_range(40..=1500u32),
                *COMMON_PORTS.choose(rng).unwrap_or(&80),
                *COMMON_PORTS.choose(rng).unwrap_or(&443),
            )
        };

        let mut packet = PacketInfo::new(&src_ip, &dst_ip, protocol, size).with_ttl(ttl);
        if protocol != TransportProtocol::Icmp {
            packet = packet.with_ports(src_port, dst_port);
        }
        if protocol == TransportProtocol::Tcp && suspicious {
            let flags = *SUSPICIOUS_TCP_FLAGS.choose(rng).unwrap_or(&2);
            packet = packet.with_tcp_flags(flags);
        }
        packet
    }
}

// ============================================================================
// SOURCE
// ============================================================================

pub struct SimulatedSource {
    settings: SimulationSettings,
}

impl SimulatedSource {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }

    /// Seed and `max_events` are fixed for the run; the interval follows
    /// the live config so a rate change needs no restart.
    pub async fn run(self, emitter: Emitter, stop: StopSignal) -> SourceOutcome {
        let mut generator = TrafficGenerator::new(self.settings.seed);
        let mut emitted = 0u64;

        log::info!(
            "Simulated source started (interval {}ms, max_events {:?})",
            emitter.snapshot().config.simulation.interval_ms,
            self.settings.max_events
        );

        loop {
            if stop.is_set() {
                return SourceOutcome::Cancelled;
            }

            match emitter.emit(generator.next_packet()).await {
                Emit::Queued => emitted += 1,
                Emit::Filtered => {}
                Emit::Closed => return SourceOutcome::Cancelled,
            }

            if self.settings.max_events.is_some_and(|max| emitted >= max) {
                log::info!("Simulated source finished after {} events", emitted);
                return SourceOutcome::Exhausted;
            }

            let interval = emitter.snapshot().config.simulation.interval_ms;
            if stop.sleep(Duration::from_millis(interval)).await {
                return SourceOutcome::Cancelled;
            }
        }
    }
}
