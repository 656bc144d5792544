//! Source Adapters
//!
//! Each capture mode is one variant of `SourceAdapter`. An adapter produces
//! raw packets and hands them to an `Emitter`, which filters and masks them
//! against the config snapshot in force at that moment and queues them for
//! the pipeline. Adapters check the `StopSignal` between packets.

pub mod backend;
pub mod privacy;

mod hybrid;
mod live;
mod replay;
mod simulated;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};

use crate::logic::config::{CaptureConfig, CaptureMode, ConfigCell, ConfigSnapshot, RetryPolicy};
use crate::logic::error::{SessionError, SessionResult, SourceError};
use crate::logic::event::{PacketInfo, SourceOrigin};

pub use backend::{default_backend, CaptureBackend, InterfaceInfo, PacketStream, SysinfoBackend};
pub use hybrid::HybridSource;
pub use live::LiveSource;
pub use replay::{parse_log_line, ReplaySource};
pub use simulated::{SimulatedSource, TrafficGenerator};

// ============================================================================
// STOP SIGNAL
// ============================================================================

/// Granularity of blocking sleeps that must notice a stop
const BLOCKING_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared by a session's producers
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is set
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Async sleep that ends early on stop; true if stopped
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return self.is_set();
        }
        tokio::select! {
            _ = self.wait() => true,
            _ = tokio::time::sleep(duration) => self.is_set(),
        }
    }

    /// Blocking-thread sleep in short slices; true if stopped
    pub fn sleep_blocking(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(BLOCKING_SLICE));
        }
    }
}

// ============================================================================
// EMITTER
// ============================================================================

/// A packet that passed the filter, ready for the pipeline
#[derive(Debug, Clone)]
pub struct Produced {
    pub packet: PacketInfo,
    pub origin: SourceOrigin,
    /// Config in force when the packet was produced
    pub config: Arc<ConfigSnapshot>,
}

/// Result of handing one packet to the emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Queued,
    /// Dropped by the filter; counts nowhere
    Filtered,
    /// Pipeline gone; producer should wind down
    Closed,
}

#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<Produced>,
    config: Arc<ConfigCell>,
    origin: SourceOrigin,
}

impl Emitter {
    pub fn new(tx: mpsc::Sender<Produced>, config: Arc<ConfigCell>, origin: SourceOrigin) -> Self {
        Self { tx, config, origin }
    }

    fn prepare(&self, packet: PacketInfo) -> Option<Produced> {
        let snapshot = self.config.load();
        if !snapshot.filter.matches(&packet) {
            return None;
        }

        let packet = if snapshot.config.privacy_mode {
            privacy::mask_packet(packet)
        } else {
            packet
        };

        Some(Produced {
            packet: packet.enriched(),
            origin: self.origin,
            config: snapshot,
        })
    }

    pub async fn emit(&self, packet: PacketInfo) -> Emit {
        match self.prepare(packet) {
            None => Emit::Filtered,
            Some(produced) => match self.tx.send(produced).await {
                Ok(()) => Emit::Queued,
                Err(_) => Emit::Closed,
            },
        }
    }

    /// For producers on blocking threads
    pub fn emit_blocking(&self, packet: PacketInfo) -> Emit {
        match self.prepare(packet) {
            None => Emit::Filtered,
            Some(produced) => match self.tx.blocking_send(produced) {
                Ok(()) => Emit::Queued,
                Err(_) => Emit::Closed,
            },
        }
    }

    /// Config currently in force
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.config.load()
    }

    /// Revision of the config currently in force
    pub fn revision(&self) -> u64 {
        self.config.revision()
    }

    /// Capture filter expression for the current rules
    pub fn bpf_expression(&self) -> String {
        self.config.load().filter.bpf_expression()
    }
}

// ============================================================================
// SOURCE ADAPTER
// ============================================================================

/// How a producer finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Stop signal or pipeline shutdown
    Cancelled,
    /// Source ran out of data (EOF, `max_events`)
    Exhausted,
    /// Unrecoverable source failure
    Failed(SourceError),
}

pub enum SourceAdapter {
    Simulated(SimulatedSource),
    RealCapture(LiveSource),
    Hybrid(HybridSource),
    LogReplay(ReplaySource),
}

impl SourceAdapter {
    /// Build the adapter for `config.mode`
    pub fn for_config(
        config: &CaptureConfig,
        backend: Arc<dyn CaptureBackend>,
        retry: RetryPolicy,
    ) -> SessionResult<Self> {
        match config.mode {
            CaptureMode::Simulated => Ok(SourceAdapter::Simulated(SimulatedSource::new(
                config.simulation.clone(),
            ))),
            CaptureMode::Real => {
                let interface = config.interface_name().ok_or_else(|| {
                    SessionError::InvalidConfig("mode 'real' requires an interface".to_string())
                })?;
                Ok(SourceAdapter::RealCapture(LiveSource::new(
                    backend,
                    interface.to_string(),
                    retry,
                )))
            }
            CaptureMode::Hybrid => {
                let interface = match config.interface_name() {
                    Some(name) => name.to_string(),
                    None => backend.default_interface().ok_or_else(|| {
                        SessionError::AdapterUnavailable(
                            "no capture interface available for hybrid mode".to_string(),
                        )
                    })?,
                };
                let live = LiveSource::new(backend, interface, retry);
                let simulated = SimulatedSource::new(config.simulation.clone());
                Ok(SourceAdapter::Hybrid(HybridSource::new(live, simulated)))
            }
            CaptureMode::Logs => {
                let path = config.log_file.clone().ok_or_else(|| {
                    SessionError::InvalidConfig("mode 'logs' requires log_file".to_string())
                })?;
                Ok(SourceAdapter::LogReplay(ReplaySource::new(path)))
            }
        }
    }

    /// Origin tag stamped on every event this adapter produces
    pub fn origin(&self) -> SourceOrigin {
        match self {
            SourceAdapter::Simulated(_) => SourceOrigin::Simulated,
            SourceAdapter::RealCapture(_) => SourceOrigin::RealCapture,
            SourceAdapter::Hybrid(_) => SourceOrigin::Hybrid,
            SourceAdapter::LogReplay(_) => SourceOrigin::Logs,
        }
    }

    /// Interface the adapter captures on, if any
    pub fn interface(&self) -> Option<&str> {
        match self {
            SourceAdapter::RealCapture(live) => Some(live.interface()),
            SourceAdapter::Hybrid(hybrid) => Some(hybrid.interface()),
            _ => None,
        }
    }

    /// Produce until stopped, exhausted or failed
    pub async fn run(self, emitter: Emitter, stop: StopSignal) -> SourceOutcome {
        match self {
            SourceAdapter::Simulated(source) => source.run(emitter, stop).await,
            SourceAdapter::RealCapture(source) => source.run(emitter, stop).await,
            SourceAdapter::Hybrid(source) => source.run(emitter, stop).await,
            SourceAdapter::LogReplay(source) => source.run(emitter, stop).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::ConfigPatch;
    use crate::logic::event::TransportProtocol;

    fn emitter(config: CaptureConfig) -> (Emitter, mpsc::Receiver<Produced>, Arc<ConfigCell>) {
        let (tx, rx) = mpsc::channel(16);
        let cell = Arc::new(ConfigCell::new(config));
        (Emitter::new(tx, cell.clone(), SourceOrigin::Simulated), rx, cell)
    }

    #[tokio::test]
    async fn test_emitter_filters_and_masks() {
        let mut config = CaptureConfig::default();
        config.filters.min_packet_size = 100;
        let (emitter, mut rx, _) = emitter(config);

        let small = PacketInfo::new("192.168.1.5", "10.0.0.9", TransportProtocol::Tcp, 99);
        assert_eq!(emitter.emit(small).await, Emit::Filtered);

        let big = PacketInfo::new("192.168.1.5", "10.0.0.9", TransportProtocol::Tcp, 100)
            .with_ports(40000, 443);
        assert_eq!(emitter.emit(big).await, Emit::Queued);

        let produced = rx.recv().await.unwrap();
        assert_eq!(produced.packet.src_ip, "192.168.xxx.xxx");
        assert_eq!(produced.packet.dst_ip, "10.0.xxx.xxx");
        assert_eq!(produced.packet.service, "https");
        assert_eq!(produced.config.revision, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emitter_sees_config_swap() {
        let (emitter, mut rx, cell) = emitter(CaptureConfig::default());
        let next = cell.load().config.merged(&ConfigPatch {
            privacy_mode: Some(false),
            ..Default::default()
        });
        cell.store(next);

        let packet = PacketInfo::new("192.168.1.5", "10.0.0.9", TransportProtocol::Udp, 60);
        emitter.emit(packet).await;
        let produced = rx.recv().await.unwrap();
        assert_eq!(produced.packet.src_ip, "192.168.1.5");
        assert_eq!(produced.config.revision, 2);
    }

    #[tokio::test]
    async fn test_emitter_reports_closed_pipeline() {
        let (emitter, rx, _) = emitter(CaptureConfig::default());
        drop(rx);
        let packet = PacketInfo::new("a", "b", TransportProtocol::Udp, 60);
        assert_eq!(emitter.emit(packet).await, Emit::Closed);
    }

    #[tokio::test]
    async fn test_stop_signal_wakes_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.sleep(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.set();
        let stopped = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(stopped);
        // Already-set signal returns at once
        stop.wait().await;
    }

    #[test]
    fn test_blocking_sleep_notices_stop() {
        let stop = StopSignal::new();
        let setter = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                stop.set();
            })
        };
        let started = Instant::now();
        assert!(stop.sleep_blocking(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        setter.join().unwrap();
    }

    #[test]
    fn test_adapter_selection() {
        let backend: Arc<dyn CaptureBackend> = Arc::new(SysinfoBackend);
        let retry = RetryPolicy::default();

        let sim = SourceAdapter::for_config(&CaptureConfig::default(), backend.clone(), retry).unwrap();
        assert_eq!(sim.origin(), SourceOrigin::Simulated);

        let logs = SourceAdapter::for_config(&CaptureConfig::logs("/tmp/x.log"), backend.clone(), retry)
            .unwrap();
        assert_eq!(logs.origin(), SourceOrigin::Logs);

        let real = SourceAdapter::for_config(&CaptureConfig::real("eth0"), backend.clone(), retry)
            .unwrap();
        assert_eq!(real.origin(), SourceOrigin::RealCapture);
        assert_eq!(real.interface(), Some("eth0"));

        let hybrid = CaptureConfig {
            mode: CaptureMode::Hybrid,
            interface: Some("eth0".into()),
            ..Default::default()
        };
        let hybrid = SourceAdapter::for_config(&hybrid, backend, retry).unwrap();
        assert_eq!(hybrid.origin(), SourceOrigin::Hybrid);
    }
}
