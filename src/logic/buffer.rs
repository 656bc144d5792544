//! Recent-History Ring Buffers
//!
//! Fixed-capacity, newest-first. One writer (the pipeline), any number of
//! readers. Reads clone under the read lock, so a snapshot never sees half
//! of a push.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{ALERT_BUFFER_CAPACITY, TELEMETRY_BUFFER_CAPACITY};
use crate::logic::event::{Alert, NetworkEvent};

// ============================================================================
// RING BUFFER
// ============================================================================

pub struct RingBuffer<T> {
    items: RwLock<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push to front; evicts the oldest entry when full
    pub fn push(&self, item: T) {
        let mut items = self.items.write();
        items.push_front(item);
        items.truncate(self.capacity);
    }

    /// Up to `n` most recent entries, newest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.items.read().iter().take(n).cloned().collect()
    }

    /// Whole buffer, newest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.read().iter().cloned().collect()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<T> {
        self.items.read().front().cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.items.write().clear();
    }

    pub fn status(&self) -> BufferStatus {
        let len = self.len();
        BufferStatus {
            current_size: len,
            capacity: self.capacity,
            fill_percent: if self.capacity > 0 {
                (len as f32 / self.capacity as f32 * 100.0).min(100.0)
            } else {
                0.0
            },
        }
    }
}

/// Buffer status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    pub current_size: usize,
    pub capacity: usize,
    pub fill_percent: f32,
}

// ============================================================================
// TYPED BUFFERS
// ============================================================================

pub type TelemetryBuffer = RingBuffer<NetworkEvent>;
pub type AlertBuffer = RingBuffer<Alert>;

pub fn telemetry_buffer() -> TelemetryBuffer {
    RingBuffer::new(TELEMETRY_BUFFER_CAPACITY)
}

pub fn alert_buffer() -> AlertBuffer {
    RingBuffer::new(ALERT_BUFFER_CAPACITY)
}
