//! Live Capture Source
//!
//! Runs on the blocking pool. Open failures and broken feeds are retried with
//! exponential backoff; once the retry budget is spent the source fails.
//! A filter change that alters the BPF expression reopens the feed.

use std::sync::Arc;

use super::{CaptureBackend, Emit, Emitter, PacketStream, SourceOutcome, StopSignal};
use crate::logic::config::RetryPolicy;
use crate::logic::error::SourceError;

pub struct LiveSource {
    backend: Arc<dyn CaptureBackend>,
    interface: String,
    retry: RetryPolicy,
}

/// Why a pump over one opened feed ended
enum Pump {
    Stopped,
    FilterChanged,
    Failed { error: SourceError, delivered: bool },
}

impl LiveSource {
    pub fn new(backend: Arc<dyn CaptureBackend>, interface: String, retry: RetryPolicy) -> Self {
        Self {
            backend,
            interface,
            retry,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub async fn run(self, emitter: Emitter, stop: StopSignal) -> SourceOutcome {
        match tokio::task::spawn_blocking(move || self.run_blocking(&emitter, &stop)).await {
            Ok(outcome) => outcome,
            Err(e) => SourceOutcome::Failed(SourceError::Read(format!(
                "capture worker failed: {}",
                e
            ))),
        }
    }

    fn run_blocking(&self, emitter: &Emitter, stop: &StopSignal) -> SourceOutcome {
        let mut failures = 0u32;

        loop {
            if stop.is_set() {
                return SourceOutcome::Cancelled;
            }

            let revision = emitter.revision();
            let bpf = emitter.bpf_expression();

            let error = match self.backend.open(&self.interface, &bpf) {
                Ok(mut stream) => {
                    log::info!("Live capture on {} (filter: '{}')", self.interface, bpf);
                    match self.pump(stream.as_mut(), emitter, stop, revision, &bpf) {
                        Pump::Stopped => return SourceOutcome::Cancelled,
                        Pump::FilterChanged => {
                            log::info!("Capture filter changed, reopening {}", self.interface);
                            continue;
                        }
                        Pump::Failed { error, delivered } => {
                            if delivered {
                                failures = 0;
                            }
                            error
                        }
                    }
                }
                Err(error) => error,
            };

            if failures >= self.retry.max_retries {
                log::error!(
                    "Live capture on {} failed permanently: {}",
                    self.interface,
                    error
                );
                return SourceOutcome::Failed(SourceError::RetriesExhausted {
                    attempts: failures + 1,
                    last: error.to_string(),
                });
            }

            let delay = self.retry.delay_for(failures);
            failures += 1;
            log::warn!(
                "Live capture on {} unavailable ({}), retry {}/{} in {:?}",
                self.interface,
                error,
                failures,
                self.retry.max_retries,
                delay
            );

            if stop.sleep_blocking(delay) {
                return SourceOutcome::Cancelled;
            }
        }
    }

    fn pump(
        &self,
        stream: &mut dyn PacketStream,
        emitter: &Emitter,
        stop: &StopSignal,
        revision: u64,
        bpf: &str,
    ) -> Pump {
        let mut delivered = false;

        loop {
            if stop.is_set() {
                return Pump::Stopped;
            }
            if emitter.revision() != revision && emitter.bpf_expression() != bpf {
                return Pump::FilterChanged;
            }

            match stream.next_packet() {
                Ok(Some(packet)) => {
                    delivered = true;
                    if emitter.emit_blocking(packet) == Emit::Closed {
                        return Pump::Stopped;
                    }
                }
                Ok(None) => {}
                Err(error) => return Pump::Failed { error, delivered },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::{CaptureConfig, ConfigCell};
    use crate::logic::event::{PacketInfo, SourceOrigin, TransportProtocol};
    use crate::logic::source::testing::ScriptedBackend;
    use crate::logic::source::Produced;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_retries,
        }
    }

    fn emitter() -> (Emitter, mpsc::Receiver<Produced>, Arc<ConfigCell>) {
        let (tx, rx) = mpsc::channel(64);
        let cell = Arc::new(ConfigCell::new(CaptureConfig::real("eth0")));
        (Emitter::new(tx, cell.clone(), SourceOrigin::RealCapture), rx, cell)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_gives_up_after_retries() {
        let backend = Arc::new(ScriptedBackend::broken());
        let source = LiveSource::new(backend.clone(), "eth9".into(), fast_retry(3));
        let (emitter, _rx, _) = emitter();

        let outcome = source.run(emitter, StopSignal::new()).await;
        match outcome {
            SourceOutcome::Failed(SourceError::RetriesExhausted { attempts, .. }) => {
                assert_eq!(attempts, 4)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(backend.open_count(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recovers_after_transient_failures() {
        let packet = PacketInfo::new("192.168.1.2", "10.0.0.3", TransportProtocol::Tcp, 300)
            .with_ports(50000, 80);
        let backend = Arc::new(ScriptedBackend::new(2, vec![packet]));
        let source = LiveSource::new(backend, "eth0".into(), fast_retry(5));
        let (emitter, mut rx, _) = emitter();
        let stop = StopSignal::new();

        let task = tokio::spawn(source.run(emitter, stop.clone()));
        let produced = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("packet delivered")
            .unwrap();
        assert_eq!(produced.origin, SourceOrigin::RealCapture);
        assert_eq!(produced.packet.src_ip, "192.168.xxx.xxx");

        stop.set();
        assert_eq!(task.await.unwrap(), SourceOutcome::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_filter_change_reopens_with_new_bpf() {
        let backend = Arc::new(ScriptedBackend::new(0, vec![]));
        let source = LiveSource::new(backend.clone(), "eth0".into(), fast_retry(5));
        let (emitter, _rx, cell) = emitter();
        let stop = StopSignal::new();
        let task = tokio::spawn(source.run(emitter, stop.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut next = cell.load().config.clone();
        next.filters.ports = [443].into_iter().collect();
        cell.store(next);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while backend.filters.lock().len() < 2 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop.set();
        task.await.unwrap();

        let filters = backend.filters.lock().clone();
        assert_eq!(filters[0], "(tcp or udp or icmp)");
        assert_eq!(filters[1], "(tcp or udp or icmp) and (port 443)");
    }
}
