//! Live Fan-out
//!
//! Publish/subscribe for classified events and alerts. Publishing never
//! waits on a subscriber: every subscriber reads from its own bounded backlog
//! (cursor into a shared ring) and a subscriber that falls behind loses the
//! oldest items or is disconnected, depending on the policy.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::logic::event::{Alert, NetworkEvent};

// ============================================================================
// MESSAGES
// ============================================================================

/// One item of the live stream: `{"kind": "event" | "alert", "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum StreamMessage {
    Event(NetworkEvent),
    Alert(Alert),
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Event(_) => "event",
            StreamMessage::Alert(_) => "alert",
        }
    }
}

// ============================================================================
// OVERFLOW POLICY
// ============================================================================

/// What happens to a subscriber whose backlog overflows.
/// One policy per broadcaster, applied to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum OverflowPolicy {
    /// Skip the oldest queued items and keep going
    #[default]
    DropOldest,
    /// End the subscription once total skipped items exceed `max_lag`
    Disconnect { max_lag: u64 },
}

// ============================================================================
// BROADCASTER
// ============================================================================

pub struct Broadcaster {
    tx: broadcast::Sender<StreamMessage>,
    policy: OverflowPolicy,
}

impl Broadcaster {
    /// `backlog` is the per-subscriber queue bound (rounded up to a power of two)
    pub fn new(backlog: usize, policy: OverflowPolicy) -> Self {
        let (tx, _) = broadcast::channel(backlog.max(1));
        Self { tx, policy }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
            policy: self.policy,
            dropped: 0,
        }
    }

    pub fn publish_event(&self, event: &NetworkEvent) {
        self.publish(StreamMessage::Event(event.clone()));
    }

    pub fn publish_alert(&self, alert: &Alert) {
        self.publish(StreamMessage::Alert(alert.clone()));
    }

    fn publish(&self, message: StreamMessage) {
        // Err only means nobody is listening
        let _ = self.tx.send(message);
    }

    /// Live subscriptions; disconnected ones no longer count
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// One live consumer. Dropping it unsubscribes.
pub struct Subscription {
    /// Released when the overflow policy disconnects this subscriber
    rx: Option<broadcast::Receiver<StreamMessage>>,
    policy: OverflowPolicy,
    dropped: u64,
}

impl Subscription {
    /// Next message in emission order; `None` once closed or disconnected
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        loop {
            let received = self.rx.as_mut()?.recv().await;
            match received {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when nothing is queued or closed
    pub fn try_recv(&mut self) -> Option<StreamMessage> {
        loop {
            let received = self.rx.as_mut()?.try_recv();
            match received {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn on_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        match self.policy {
            OverflowPolicy::DropOldest => {
                log::debug!("Subscriber lagged, dropped {} oldest items", skipped);
            }
            OverflowPolicy::Disconnect { max_lag } if self.dropped > max_lag => {
                log::warn!(
                    "Subscriber disconnected: lag {} exceeds limit {}",
                    self.dropped,
                    max_lag
                );
                self.rx = None;
            }
            OverflowPolicy::Disconnect { .. } => {}
        }
    }

    /// Items this subscriber never saw
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_disconnected(&self) -> bool {
        self.rx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::event::{PacketInfo, SourceOrigin, ThreatLevel, TransportProtocol};

    fn event(id: u64) -> NetworkEvent {
        let packet = PacketInfo::new("a", "b", TransportProtocol::Tcp, 100);
        NetworkEvent::new(id, SourceOrigin::Simulated, 1, packet)
    }

    fn event_id(message: &StreamMessage) -> u64 {
        match message {
            StreamMessage::Event(e) => e.id,
            StreamMessage::Alert(a) => a.event_id,
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_everything_in_order() {
        let broadcaster = Broadcaster::new(64, OverflowPolicy::DropOldest);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        for id in 1..=10 {
            let e = event(id);
            broadcaster.publish_event(&e);
            if id % 5 == 0 {
                broadcaster.publish_alert(&Alert::for_event(&e, 0.9, ThreatLevel::High));
            }
        }

        for sub in [&mut first, &mut second] {
            let mut kinds = Vec::new();
            let mut ids = Vec::new();
            while let Some(message) = sub.try_recv() {
                kinds.push(message.kind());
                ids.push(event_id(&message));
            }
            assert_eq!(ids, vec![1, 2, 3, 4, 5, 5, 6, 7, 8, 9, 10, 10]);
            assert_eq!(kinds[4], "event");
            assert_eq!(kinds[5], "alert");
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::DropOldest);
        for id in 0..1_000 {
            broadcaster.publish_event(&event(id));
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest_in_order() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::DropOldest);
        let mut slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        let mut fast_seen = Vec::new();
        for id in 1..=10 {
            broadcaster.publish_event(&event(id));
            fast_seen.push(event_id(&fast.recv().await.unwrap()));
        }
        assert_eq!(fast_seen, (1..=10).collect::<Vec<_>>());

        let mut slow_seen = Vec::new();
        while let Some(message) = slow.try_recv() {
            slow_seen.push(event_id(&message));
        }
        assert_eq!(slow_seen, vec![7, 8, 9, 10]);
        assert_eq!(slow.dropped(), 6);
        assert!(!slow.is_disconnected());
    }

    #[tokio::test]
    async fn test_disconnect_policy() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::Disconnect { max_lag: 2 });
        let mut slow = broadcaster.subscribe();
        let _healthy = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        for id in 1..=10 {
            broadcaster.publish_event(&event(id));
        }

        assert!(slow.recv().await.is_none());
        assert!(slow.is_disconnected());
        assert_eq!(broadcaster.subscriber_count(), 1);
        // Stays closed even after new traffic
        broadcaster.publish_event(&event(11));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_tolerates_small_lag() {
        let broadcaster = Broadcaster::new(4, OverflowPolicy::Disconnect { max_lag: 10 });
        let mut sub = broadcaster.subscribe();
        for id in 1..=6 {
            broadcaster.publish_event(&event(id));
        }
        assert_eq!(sub.recv().await.map(|m| event_id(&m)), Some(3));
        assert_eq!(sub.dropped(), 2);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(StreamMessage::Event(event(3))).unwrap();
        assert_eq!(json["kind"], "event");
        assert_eq!(json["payload"]["id"], 3);
    }
}
