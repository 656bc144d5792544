//! Status Reporter
//!
//! Authoritative session counters. Buffers evict; these don't.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Window for `alerts_last_hour`
const ALERT_RATE_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct StatusReporter {
    accepted: AtomicU64,
    alerts: AtomicU64,
    unclassified: AtomicU64,
    /// Alert instants inside the rate window, oldest first
    recent_alerts: Mutex<VecDeque<Instant>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total_accepted: u64,
    pub total_alerts: u64,
    pub total_unclassified: u64,
    pub alerts_last_hour: u64,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
            unclassified: AtomicU64::new(0),
            recent_alerts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unclassified(&self) {
        self.unclassified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.record_alert_at(Instant::now());
    }

    fn record_alert_at(&self, at: Instant) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent_alerts.lock();
        recent.push_back(at);
        prune(&mut recent, at);
    }

    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn total_alerts(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }

    pub fn total_unclassified(&self) -> u64 {
        self.unclassified.load(Ordering::Relaxed)
    }

    pub fn alerts_last_hour(&self) -> u64 {
        let mut recent = self.recent_alerts.lock();
        prune(&mut recent, Instant::now());
        recent.len() as u64
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_accepted: self.total_accepted(),
            total_alerts: self.total_alerts(),
            total_unclassified: self.total_unclassified(),
            alerts_last_hour: self.alerts_last_hour(),
        }
    }

    /// Zero everything (fresh `start` only)
    pub fn reset(&self) {
        self.accepted.store(0, Ordering::Relaxed);
        self.alerts.store(0, Ordering::Relaxed);
        self.unclassified.store(0, Ordering::Relaxed);
        self.recent_alerts.lock().clear();
    }
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = recent.front() {
        if now.saturating_duration_since(*oldest) > ALERT_RATE_WINDOW {
            recent.pop_front();
        } else {
            break;
        }
    }
}
