//! Event Pipeline
//!
//! Single consumer of a session's queue. Per event, in arrival order:
//! assign id, count, classify (bounded), evaluate alert, buffer, broadcast.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::Shared;
use crate::logic::alert::AlertEngine;
use crate::logic::event::NetworkEvent;
use crate::logic::source::Produced;

/// Closed when a session is abandoned after its drain timeout.
///
/// The pipeline touches shared state only while holding the read side, so
/// once `close` returns no write from the abandoned session can land.
#[derive(Debug, Clone, Default)]
pub(super) struct Gate(Arc<RwLock<bool>>);

impl Gate {
    pub(super) fn close(&self) {
        *self.0.write() = true;
    }
}

pub(super) struct Pipeline {
    shared: Arc<Shared>,
    engine: AlertEngine,
    gate: Gate,
}

impl Pipeline {
    pub(super) fn new(shared: Arc<Shared>, gate: Gate) -> Self {
        Self {
            shared,
            engine: AlertEngine::new(),
            gate,
        }
    }

    /// Consume until every producer handle is dropped
    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<Produced>) {
        let mut processed = 0u64;
        while let Some(produced) = rx.recv().await {
            let Some(id) = self.admit() else {
                log::warn!("Pipeline abandoned, discarding queued events");
                break;
            };
            self.process(id, produced).await;
            processed += 1;
        }
        log::debug!(
            "Pipeline finished after {} events ({} alerts)",
            processed,
            self.engine.alerts_raised()
        );
    }

    /// Assign the next id and count the event; `None` once abandoned
    fn admit(&self) -> Option<u64> {
        let closed = self.gate.0.read();
        if *closed {
            return None;
        }
        let id = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.reporter.record_accepted();
        Some(id)
    }

    async fn process(&mut self, id: u64, produced: Produced) {
        let shared = &self.shared;

        let mut event =
            NetworkEvent::new(id, produced.origin, produced.config.revision, produced.packet);

        let classified = shared.classifier.classify(event.clone()).await;

        let closed = self.gate.0.read();
        if *closed {
            return;
        }

        match classified {
            Ok(score) => event.classification = score.into_classification(),
            Err(e) => {
                shared.reporter.record_unclassified();
                log::warn!("Event {} left unclassified: {}", id, e);
            }
        }

        let alert = self
            .engine
            .evaluate(&mut event, produced.config.config.alert_threshold);

        shared.telemetry.push(event.clone());
        shared.broadcaster.publish_event(&event);

        if let Some(alert) = alert {
            shared.alerts.push(alert.clone());
            shared.reporter.record_alert();
            shared.broadcaster.publish_alert(&alert);
        }
    }
}
