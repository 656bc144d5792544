//! Capture & Engine Configuration
//!
//! `CaptureConfig` is the per-session configuration (validated, immutable once
//! applied). `EngineSettings` holds process-wide knobs loaded from env.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::broadcast::OverflowPolicy;
use crate::logic::error::{SessionError, SessionResult};
use crate::logic::event::TransportProtocol;
use crate::logic::filter::Filter;

// ============================================================================
// CAPTURE MODE
// ============================================================================

/// Where events come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Simulated,
    Real,
    Hybrid,
    Logs,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Simulated => "simulated",
            CaptureMode::Real => "real",
            CaptureMode::Hybrid => "hybrid",
            CaptureMode::Logs => "logs",
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// FILTER RULES
// ============================================================================

fn default_protocols() -> BTreeSet<TransportProtocol> {
    [TransportProtocol::Tcp, TransportProtocol::Udp, TransportProtocol::Icmp]
        .into_iter()
        .collect()
}

/// Filter rules; empty sets mean "no filtering" on that axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default = "default_protocols")]
    pub protocols: BTreeSet<TransportProtocol>,
    #[serde(default)]
    pub ports: BTreeSet<u16>,
    #[serde(default)]
    pub min_packet_size: u32,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            protocols: default_protocols(),
            ports: BTreeSet::new(),
            min_packet_size: 0,
        }
    }
}

// ============================================================================
// SIMULATION SETTINGS
// ============================================================================

fn default_simulation_interval() -> u64 {
    constants::DEFAULT_SIMULATION_INTERVAL_MS
}

/// Synthetic traffic knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_simulation_interval")]
    pub interval_ms: u64,
    /// Fixed seed makes the stream reproducible
    #[serde(default)]
    pub seed: Option<u64>,
    /// Stream ends cleanly after this many emitted events
    #[serde(default)]
    pub max_events: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_simulation_interval(),
            seed: None,
            max_events: None,
        }
    }
}

// ============================================================================
// CAPTURE CONFIG
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    constants::DEFAULT_ALERT_THRESHOLD
}

fn default_replay_interval() -> u64 {
    constants::DEFAULT_REPLAY_INTERVAL_MS
}

/// Per-session capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_true")]
    pub privacy_mode: bool,
    #[serde(default = "default_threshold")]
    pub alert_threshold: f32,
    #[serde(default)]
    pub filters: FilterRules,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_replay_interval")]
    pub replay_interval_ms: u64,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Simulated,
            interface: None,
            privacy_mode: true,
            alert_threshold: default_threshold(),
            filters: FilterRules::default(),
            log_file: None,
            replay_interval_ms: default_replay_interval(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl CaptureConfig {
    pub fn simulated() -> Self {
        Self::default()
    }

    pub fn real(interface: &str) -> Self {
        Self {
            mode: CaptureMode::Real,
            interface: Some(interface.to_string()),
            ..Default::default()
        }
    }

    pub fn logs(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: CaptureMode::Logs,
            log_file: Some(path.into()),
            ..Default::default()
        }
    }

    /// Interface name with surrounding whitespace removed; `None` if blank
    pub fn interface_name(&self) -> Option<&str> {
        self.interface
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Static checks that need no knowledge of the host
    pub fn validate(&self) -> SessionResult<()> {
        if !self.alert_threshold.is_finite() || !(0.0..=1.0).contains(&self.alert_threshold) {
            return Err(SessionError::InvalidConfig(format!(
                "alert_threshold must be within [0, 1], got {}",
                self.alert_threshold
            )));
        }

        if self.filters.protocols.contains(&TransportProtocol::Other) {
            return Err(SessionError::InvalidConfig(
                "filters.protocols may only contain TCP, UDP, ICMP".to_string(),
            ));
        }

        match self.mode {
            CaptureMode::Real if self.interface_name().is_none() => Err(
                SessionError::InvalidConfig("mode 'real' requires an interface".to_string()),
            ),
            CaptureMode::Logs if self.log_file.is_none() => Err(SessionError::InvalidConfig(
                "mode 'logs' requires log_file".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Check the configured interface against the host's list
    pub fn validate_interface(&self, known: &[String]) -> SessionResult<()> {
        let needs_check = matches!(self.mode, CaptureMode::Real | CaptureMode::Hybrid);
        match self.interface_name() {
            Some(name) if needs_check && !known.iter().any(|k| k == name) => Err(
                SessionError::InvalidConfig(format!("unknown interface '{}'", name)),
            ),
            _ => Ok(()),
        }
    }

    /// True when switching from `self` to `next` needs a new adapter.
    ///
    /// Only fields the active mode reads count. Pacing (`interval_ms`,
    /// `replay_interval_ms`) is read per step and never restarts.
    pub fn requires_restart(&self, next: &CaptureConfig) -> bool {
        if self.mode != next.mode {
            return true;
        }

        let interface = self.interface_name() != next.interface_name();
        let generator = self.simulation.seed != next.simulation.seed
            || self.simulation.max_events != next.simulation.max_events;

        match self.mode {
            CaptureMode::Simulated => generator,
            CaptureMode::Real => interface,
            CaptureMode::Hybrid => interface || generator,
            CaptureMode::Logs => self.log_file != next.log_file,
        }
    }

    /// Produce a new config with the patch applied (not validated)
    pub fn merged(&self, patch: &ConfigPatch) -> CaptureConfig {
        let mut next = self.clone();
        if let Some(mode) = patch.mode {
            next.mode = mode;
        }
        if let Some(interface) = &patch.interface {
            next.interface = Some(interface.clone());
        }
        if let Some(privacy) = patch.privacy_mode {
            next.privacy_mode = privacy;
        }
        if let Some(threshold) = patch.alert_threshold {
            next.alert_threshold = threshold;
        }
        if let Some(filters) = &patch.filters {
            if let Some(protocols) = &filters.protocols {
                next.filters.protocols = protocols.clone();
            }
            if let Some(ports) = &filters.ports {
                next.filters.ports = ports.clone();
            }
            if let Some(min) = filters.min_packet_size {
                next.filters.min_packet_size = min;
            }
        }
        if let Some(path) = &patch.log_file {
            next.log_file = Some(path.clone());
        }
        if let Some(interval) = patch.replay_interval_ms {
            next.replay_interval_ms = interval;
        }
        if let Some(simulation) = &patch.simulation {
            next.simulation = simulation.clone();
        }
        next
    }
}

// ============================================================================
// ACTIVE CONFIG
// ============================================================================

/// An applied config with its compiled filter and revision number
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: CaptureConfig,
    pub filter: Filter,
    pub revision: u64,
}

/// Holder of the active config. Readers take an `Arc` to the current
/// snapshot; a swap replaces the pointer, never the contents.
#[derive(Debug)]
pub struct ConfigCell {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigCell {
    pub fn new(config: CaptureConfig) -> Self {
        let filter = Filter::from_rules(&config.filters);
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot {
                config,
                filter,
                revision: 1,
            })),
        }
    }

    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn revision(&self) -> u64 {
        self.current.read().revision
    }

    /// Install `config` as the next revision; returns the new revision
    pub fn store(&self, config: CaptureConfig) -> u64 {
        let filter = Filter::from_rules(&config.filters);
        let mut current = self.current.write();
        let revision = current.revision + 1;
        *current = Arc::new(ConfigSnapshot {
            config,
            filter,
            revision,
        });
        revision
    }
}

// ============================================================================
// CONFIG PATCH
// ============================================================================

/// Partial filter update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPatch {
    #[serde(default)]
    pub protocols: Option<BTreeSet<TransportProtocol>>,
    #[serde(default)]
    pub ports: Option<BTreeSet<u16>>,
    #[serde(default)]
    pub min_packet_size: Option<u32>,
}

/// Partial capture config update for `reconfigure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub mode: Option<CaptureMode>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub privacy_mode: Option<bool>,
    #[serde(default)]
    pub alert_threshold: Option<f32>,
    #[serde(default)]
    pub filters: Option<FilterPatch>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub replay_interval_ms: Option<u64>,
    #[serde(default)]
    pub simulation: Option<SimulationSettings>,
}

impl ConfigPatch {
    pub fn min_packet_size(size: u32) -> Self {
        Self {
            filters: Some(FilterPatch {
                min_packet_size: Some(size),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn alert_threshold(threshold: f32) -> Self {
        Self {
            alert_threshold: Some(threshold),
            ..Default::default()
        }
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Exponential backoff for live capture reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(constants::DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(constants::DEFAULT_RETRY_MAX_DELAY_MS),
            max_retries: constants::DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Process-wide engine knobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub classifier_timeout: Duration,
    pub classifier_max_pending: usize,
    pub drain_timeout: Duration,
    pub queue_capacity: usize,
    pub subscriber_backlog: usize,
    pub overflow_policy: OverflowPolicy,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_millis(constants::DEFAULT_CLASSIFIER_TIMEOUT_MS),
            classifier_max_pending: constants::DEFAULT_CLASSIFIER_MAX_PENDING,
            drain_timeout: Duration::from_millis(constants::DEFAULT_DRAIN_TIMEOUT_MS),
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            subscriber_backlog: constants::DEFAULT_SUBSCRIBER_BACKLOG,
            overflow_policy: OverflowPolicy::DropOldest,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from environment variables
    pub fn from_env() -> Self {
        let overflow_policy = match constants::get_subscriber_max_lag() {
            Some(max_lag) => OverflowPolicy::Disconnect { max_lag },
            None => OverflowPolicy::DropOldest,
        };

        Self {
            classifier_timeout: Duration::from_millis(constants::get_classifier_timeout_ms()),
            classifier_max_pending: constants::get_classifier_max_pending(),
            drain_timeout: Duration::from_millis(constants::get_drain_timeout_ms()),
            queue_capacity: constants::get_queue_capacity(),
            subscriber_backlog: constants::get_subscriber_backlog(),
            overflow_policy,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(constants::get_retry_base_ms()),
                max_retries: constants::get_max_retries(),
                ..Default::default()
            },
        }
    }
}
