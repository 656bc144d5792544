//! Classifier Seam
//!
//! The pipeline only knows `Classifier::score`. Scoring runs on the blocking
//! pool under a timeout with a bounded number of calls in flight; any
//! failure leaves the event unclassified.
//! `HeuristicClassifier` is the built-in rule-based scorer used when no model
//! is plugged in.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::logic::error::ClassifierError;
use crate::logic::event::{Classification, NetworkEvent};

// ============================================================================
// CONTRACT
// ============================================================================

/// Classifier output for one event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub probability: f32,
    pub prediction: bool,
}

impl Score {
    pub fn into_classification(self) -> Classification {
        Classification::scored(self.probability, self.prediction)
    }
}

/// Any scorer the pipeline can call. Must be callable from worker threads.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, event: &NetworkEvent) -> Result<Score, ClassifierError>;
}

/// Scores on the blocking pool under a timeout, with a cap on calls still
/// running there. A timed-out call keeps its permit until its thread
/// returns, so a hung classifier cannot pile up threads.
pub struct BoundedClassifier {
    inner: Arc<dyn Classifier>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl BoundedClassifier {
    pub fn new(inner: Arc<dyn Classifier>, max_pending: usize, timeout: Duration) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_pending)),
            max_pending,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// A probability outside [0, 1] counts as a failure
    pub async fn classify(&self, event: NetworkEvent) -> Result<Score, ClassifierError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ClassifierError::Saturated(self.max_pending))?;

        let inner = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            inner.score(&event)
        });

        let score = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(ClassifierError::Failed(format!("Task failed: {}", join_err)))
            }
            Err(_) => return Err(ClassifierError::Timeout(self.timeout)),
        };

        if !score.probability.is_finite() || !(0.0..=1.0).contains(&score.probability) {
            return Err(ClassifierError::Failed(format!(
                "probability out of range: {}",
                score.probability
            )));
        }
        Ok(score)
    }
}

// ============================================================================
// HEURISTIC FALLBACK
// ============================================================================

/// Packet size above which a packet looks suspicious
const LARGE_PACKET_BYTES: u32 = 1000;

/// Ports above this are treated as unusual ephemeral ports
const HIGH_PORT_MIN: u16 = 50_000;

const LARGE_PACKET_WEIGHT: f32 = 0.3;
const PRIVILEGED_PORT_WEIGHT: f32 = 0.2;
const HIGH_PORT_WEIGHT: f32 = 0.1;
const MAX_JITTER: f32 = 0.2;

/// Rule-based scorer with bounded random jitter
pub struct HeuristicClassifier {
    rng: Mutex<StdRng>,
    jitter: bool,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            jitter: true,
        }
    }

    /// Reproducible jitter
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            jitter: true,
        }
    }

    /// Pure rule score, no jitter
    pub fn deterministic() -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            jitter: false,
        }
    }

    fn rule_score(event: &NetworkEvent) -> f32 {
        let packet = &event.packet;
        let mut score = 0.0f32;

        if packet.size > LARGE_PACKET_BYTES {
            score += LARGE_PACKET_WEIGHT;
        }

        let ports: Vec<u16> = [packet.src_port, packet.dst_port]
            .into_iter()
            .flatten()
            .collect();
        if ports.iter().any(|p| *p < 1024) {
            score += PRIVILEGED_PORT_WEIGHT;
        }
        if ports.iter().any(|p| *p > HIGH_PORT_MIN) {
            score += HIGH_PORT_WEIGHT;
        }

        score
    }
}

impl Classifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn score(&self, event: &NetworkEvent) -> Result<Score, ClassifierError> {
        let mut probability = Self::rule_score(event);
        if self.jitter {
            probability += self.rng.lock().gen_range(0.0..MAX_JITTER);
        }
        let probability = probability.clamp(0.0, 1.0);

        Ok(Score {
            probability,
            prediction: probability > 0.5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::event::{PacketInfo, SourceOrigin, TransportProtocol};

    fn event(size: u32, src: u16, dst: u16) -> NetworkEvent {
        let packet =
            PacketInfo::new("a", "b", TransportProtocol::Tcp, size).with_ports(src, dst);
        NetworkEvent::new(1, SourceOrigin::Simulated, 1, packet)
    }

    struct Slow(Duration);

    impl Classifier for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn score(&self, _event: &NetworkEvent) -> Result<Score, ClassifierError> {
            std::thread::sleep(self.0);
            Ok(Score { probability: 0.9, prediction: true })
        }
    }

    struct OutOfRange;

    impl Classifier for OutOfRange {
        fn name(&self) -> &str {
            "broken"
        }

        fn score(&self, _event: &NetworkEvent) -> Result<Score, ClassifierError> {
            Ok(Score { probability: 1.5, prediction: true })
        }
    }

    #[test]
    fn test_rule_weights() {
        let classifier = HeuristicClassifier::deterministic();

        let benign = classifier.score(&event(100, 8080, 9090)).unwrap();
        assert_eq!(benign.probability, 0.0);
        assert!(!benign.prediction);

        let worst = classifier.score(&event(5000, 22, 60000)).unwrap();
        assert!((worst.probability - 0.6).abs() < 1e-6);
        assert!(worst.prediction);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let classifier = HeuristicClassifier::seeded(7);
        for _ in 0..500 {
            let score = classifier.score(&event(100, 8080, 9090)).unwrap();
            assert!((0.0..0.2).contains(&score.probability));
        }
        for _ in 0..500 {
            let score = classifier.score(&event(5000, 22, 60000)).unwrap();
            assert!((0.599..=0.801).contains(&score.probability));
        }
    }

    fn bounded(classifier: impl Classifier + 'static, timeout: Duration) -> BoundedClassifier {
        BoundedClassifier::new(Arc::new(classifier), 2, timeout)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout() {
        let slow = bounded(Slow(Duration::from_millis(300)), Duration::from_millis(20));
        let result = slow.classify(event(1, 1, 1)).await;
        assert!(matches!(result, Err(ClassifierError::Timeout(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hung_calls_capped() {
        let slow = bounded(Slow(Duration::from_millis(400)), Duration::from_millis(10));

        // Two timed-out calls still hold both permits
        for _ in 0..2 {
            let result = slow.classify(event(1, 1, 1)).await;
            assert!(matches!(result, Err(ClassifierError::Timeout(_))));
        }
        let result = slow.classify(event(1, 1, 1)).await;
        assert_eq!(result, Err(ClassifierError::Saturated(2)));

        // Permits come back once the threads finish
        tokio::time::sleep(Duration::from_millis(600)).await;
        let result = slow.classify(event(1, 1, 1)).await;
        assert!(matches!(result, Err(ClassifierError::Timeout(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_out_of_range_rejected() {
        let broken = bounded(OutOfRange, Duration::from_secs(1));
        let result = broken.classify(event(1, 1, 1)).await;
        assert!(matches!(result, Err(ClassifierError::Failed(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_within_timeout() {
        let classifier = bounded(HeuristicClassifier::deterministic(), Duration::from_secs(1));
        assert_eq!(classifier.name(), "heuristic");
        let score = classifier.classify(event(2000, 80, 80)).await.unwrap();
        assert!((score.probability - 0.5).abs() < 1e-6);
        assert!(!score.prediction);
    }
}
