//! Address masking applied before an event leaves its adapter.

use std::net::Ipv4Addr;

use crate::logic::event::PacketInfo;

const FULLY_MASKED: &str = "xxx.xxx.xxx.xxx";

/// IPv4 keeps its first two octets (`192.168.xxx.xxx`); anything else,
/// IPv6 included, is masked completely.
pub fn mask_address(address: &str) -> String {
    match address.trim().parse::<Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, _, _] = ip.octets();
            format!("{}.{}.xxx.xxx", a, b)
        }
        Err(_) => FULLY_MASKED.to_string(),
    }
}

pub fn mask_packet(mut packet: PacketInfo) -> PacketInfo {
    packet.src_ip = mask_address(&packet.src_ip);
    packet.dst_ip = mask_address(&packet.dst_ip);
    packet
}
