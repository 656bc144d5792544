//! Hybrid Source
//!
//! Live capture and synthetic traffic as two independent producers feeding
//! the same queue. The session's stop reaches both halves; a fatal live
//! failure also stops the simulated half.

use super::{Emitter, LiveSource, SimulatedSource, SourceOutcome, StopSignal};
use crate::logic::error::SourceError;

pub struct HybridSource {
    live: LiveSource,
    simulated: SimulatedSource,
}

impl HybridSource {
    pub fn new(live: LiveSource, simulated: SimulatedSource) -> Self {
        Self { live, simulated }
    }

    pub fn interface(&self) -> &str {
        self.live.interface()
    }

    pub async fn run(self, emitter: Emitter, stop: StopSignal) -> SourceOutcome {
        let halves = StopSignal::new();

        let forward = {
            let stop = stop.clone();
            let halves = halves.clone();
            tokio::spawn(async move {
                stop.wait().await;
                halves.set();
            })
        };

        let live = tokio::spawn(self.live.run(emitter.clone(), halves.clone()));
        let simulated = tokio::spawn(self.simulated.run(emitter, halves.clone()));

        let live_outcome = live.await.unwrap_or_else(|e| {
            SourceOutcome::Failed(SourceError::Read(format!("live half failed: {}", e)))
        });
        if let SourceOutcome::Failed(err) = &live_outcome {
            log::error!("Hybrid live half failed ({}), stopping simulated half", err);
            halves.set();
        }

        let simulated_outcome = simulated.await.unwrap_or(SourceOutcome::Cancelled);
        forward.abort();

        log::debug!(
            "Hybrid source ended (live: {:?}, simulated: {:?})",
            live_outcome,
            simulated_outcome
        );

        match live_outcome {
            SourceOutcome::Failed(err) => SourceOutcome::Failed(err),
            _ => SourceOutcome::Cancelled,
        }
    }
}
