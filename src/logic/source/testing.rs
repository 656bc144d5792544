//! Scripted capture backend for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{CaptureBackend, InterfaceInfo, PacketStream};
use crate::logic::error::SourceError;
use crate::logic::event::PacketInfo;

/// Fails the first `fail_opens` opens, then streams the queued packets and
/// keeps timing out. Records every BPF expression it was opened with.
pub struct ScriptedBackend {
    pub interfaces: Vec<String>,
    fail_opens: u32,
    pub opens: AtomicU32,
    packets: Mutex<VecDeque<PacketInfo>>,
    pub filters: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(fail_opens: u32, packets: Vec<PacketInfo>) -> Self {
        Self {
            interfaces: vec!["eth0".to_string(), "lo".to_string()],
            fail_opens,
            opens: AtomicU32::new(0),
            packets: Mutex::new(packets.into()),
            filters: Mutex::new(Vec::new()),
        }
    }

    /// Every open fails
    pub fn broken() -> Self {
        Self::new(u32::MAX, Vec::new())
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn list_interfaces(&self) -> Vec<InterfaceInfo> {
        self.interfaces
            .iter()
            .map(|name| InterfaceInfo {
                name: name.clone(),
                address: None,
                hardware_address: None,
                is_up: true,
            })
            .collect()
    }

    fn open(&self, _interface: &str, bpf: &str) -> Result<Box<dyn PacketStream>, SourceError> {
        self.filters.lock().push(bpf.to_string());
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_opens {
            return Err(SourceError::Unavailable("no such device".into()));
        }
        let packets: VecDeque<PacketInfo> = self.packets.lock().drain(..).collect();
        Ok(Box::new(VecStream(packets)))
    }
}

struct VecStream(VecDeque<PacketInfo>);

impl PacketStream for VecStream {
    fn next_packet(&mut self) -> Result<Option<PacketInfo>, SourceError> {
        match self.0.pop_front() {
            Some(packet) => Ok(Some(packet)),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(None)
            }
        }
    }
}
