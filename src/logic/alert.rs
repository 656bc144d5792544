//! Alert Engine
//!
//! Input: a (possibly) classified event. Output: the event's threat band and,
//! when the probability reaches the alert threshold, one Alert.
//! Bands are fixed; the threshold only gates emission.

use crate::logic::event::{Alert, NetworkEvent, ThreatLevel};

#[derive(Debug, Default)]
pub struct AlertEngine {
    /// Highest event id already evaluated
    last_evaluated: Option<u64>,
    alerts_raised: u64,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the threat band and decide on an alert.
    ///
    /// Unclassified events are skipped. An event whose id is not newer than
    /// the last evaluated one is ignored, so an event can never alert twice.
    pub fn evaluate(&mut self, event: &mut NetworkEvent, alert_threshold: f32) -> Option<Alert> {
        if self.last_evaluated.is_some_and(|last| event.id <= last) {
            log::warn!("Event {} already evaluated, skipping", event.id);
            return None;
        }
        self.last_evaluated = Some(event.id);

        let probability = event.classification.probability?;
        let level = ThreatLevel::from_probability(probability);
        event.classification.threat_level = Some(level);

        if probability < alert_threshold {
            return None;
        }

        self.alerts_raised += 1;
        let alert = Alert::for_event(event, probability, level);
        log::info!(
            "[ALERT] {} event {} from {} (p={:.3}, threshold={:.2})",
            level,
            event.id,
            event.origin,
            probability,
            alert_threshold
        );
        Some(alert)
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::event::{Classification, PacketInfo, SourceOrigin, TransportProtocol};

    fn scored(id: u64, probability: f32) -> NetworkEvent {
        let packet = PacketInfo::new("a", "b", TransportProtocol::Tcp, 100);
        let mut event = NetworkEvent::new(id, SourceOrigin::Simulated, 1, packet);
        event.classification = Classification::scored(probability, probability > 0.5);
        event
    }

    #[test]
    fn test_threshold_gates_but_does_not_change_band() {
        let mut engine = AlertEngine::new();

        let mut high = scored(1, 0.8);
        assert!(engine.evaluate(&mut high, 0.9).is_none());
        assert_eq!(high.classification.threat_level, Some(ThreatLevel::High));

        let mut medium = scored(2, 0.5);
        assert!(engine.evaluate(&mut medium, 0.9).is_none());
        assert_eq!(medium.classification.threat_level, Some(ThreatLevel::Medium));

        assert_eq!(engine.alerts_raised(), 0);
    }

    #[test]
    fn test_alert_at_threshold() {
        let mut engine = AlertEngine::new();
        let mut event = scored(1, 0.7);
        let alert = engine.evaluate(&mut event, 0.7).expect("alert at threshold");
        assert_eq!(alert.event_id, 1);
        assert_eq!(alert.threat_level, ThreatLevel::High);
        assert_eq!(alert.probability, 0.7);

        // Low threshold alerts on a LOW band event too
        let mut low = scored(2, 0.1);
        let alert = engine.evaluate(&mut low, 0.05).expect("alert");
        assert_eq!(alert.threat_level, ThreatLevel::Low);
    }

    #[test]
    fn test_unclassified_skipped() {
        let mut engine = AlertEngine::new();
        let packet = PacketInfo::new("a", "b", TransportProtocol::Udp, 100);
        let mut event = NetworkEvent::new(1, SourceOrigin::Logs, 1, packet);

        assert!(engine.evaluate(&mut event, 0.0).is_none());
        assert_eq!(event.classification.threat_level, None);
    }

    #[test]
    fn test_never_reevaluates() {
        let mut engine = AlertEngine::new();
        let mut event = scored(5, 0.99);
        assert!(engine.evaluate(&mut event, 0.5).is_some());
        assert!(engine.evaluate(&mut event, 0.5).is_none());

        let mut older = scored(3, 0.99);
        assert!(engine.evaluate(&mut older, 0.5).is_none());
        assert_eq!(engine.alerts_raised(), 1);
    }
}
