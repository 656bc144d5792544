//! Session Controller
//!
//! Owns the capture lifecycle: `Idle → Starting → Running → Stopping → Idle`,
//! with `Error` on an unrecoverable source failure. At most one session runs
//! per controller.
//!
//! ## Layout
//! - Lifecycle commands serialize on an async mutex that also holds the
//!   handle of the active session.
//! - Each session is one task that owns the queue sender, runs the current
//!   producer and takes `Stop` / `Restart` messages. A restart swaps the
//!   producer only; the pipeline and everything downstream keep running.
//! - State lives behind a lock with a generation number, so a session that
//!   ends on its own can only move *its own* generation to Idle/Error.

mod pipeline;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::logic::broadcast::{Broadcaster, Subscription};
use crate::logic::buffer::{self, AlertBuffer, BufferStatus, TelemetryBuffer};
use crate::logic::classifier::{BoundedClassifier, Classifier, HeuristicClassifier};
use crate::logic::config::{CaptureConfig, CaptureMode, ConfigCell, ConfigPatch, EngineSettings};
use crate::logic::error::{SessionError, SessionResult, SourceError};
use crate::logic::event::{Alert, NetworkEvent};
use crate::logic::source::{
    default_backend, CaptureBackend, Emitter, InterfaceInfo, SourceAdapter, SourceOutcome,
    StopSignal,
};
use crate::logic::status::StatusReporter;

use pipeline::{Gate, Pipeline};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    generation: u64,
    last_error: Option<String>,
    interface: Option<String>,
}

/// Snapshot returned by `status()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub is_capturing: bool,
    pub mode: CaptureMode,
    pub interface: Option<String>,
    pub privacy_mode: bool,
    pub alert_threshold: f32,
    pub config_revision: u64,
    pub total_accepted: u64,
    pub total_alerts: u64,
    pub total_unclassified: u64,
    pub alerts_last_hour: u64,
    pub telemetry_buffer: BufferStatus,
    pub alert_buffer: BufferStatus,
    pub subscribers: usize,
    pub last_error: Option<String>,
}

/// State shared by the controller, session tasks and the pipeline
pub(crate) struct Shared {
    settings: EngineSettings,
    classifier: BoundedClassifier,
    backend: Arc<dyn CaptureBackend>,
    config: Arc<ConfigCell>,
    lifecycle: RwLock<Lifecycle>,
    telemetry: TelemetryBuffer,
    alerts: AlertBuffer,
    broadcaster: Broadcaster,
    reporter: StatusReporter,
    /// Last assigned event id
    sequence: AtomicU64,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.lifecycle.read().state
    }

    fn set_state(&self, state: SessionState) {
        self.lifecycle.write().state = state;
    }

    /// A session ended without being asked to
    fn session_ended(&self, generation: u64, end: SessionEnd) {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.generation != generation || lifecycle.state != SessionState::Running {
            return;
        }

        match end {
            SessionEnd::Stopped => {
                log::info!("Capture session {} ended", generation);
                lifecycle.state = SessionState::Idle;
            }
            SessionEnd::Exhausted => {
                log::info!("Capture session {} finished: source exhausted", generation);
                lifecycle.state = SessionState::Idle;
            }
            SessionEnd::Failed(err) => {
                log::error!("Capture session {} failed: {}", generation, err);
                lifecycle.state = SessionState::Error;
                lifecycle.last_error = Some(SessionError::from(err).to_string());
            }
        }
    }
}

// ============================================================================
// SESSION TASK
// ============================================================================

enum Control {
    Stop,
    /// Replace the producer; acked with the new config revision
    Restart {
        adapter: SourceAdapter,
        config: CaptureConfig,
        done: oneshot::Sender<u64>,
    },
}

enum SessionEnd {
    Stopped,
    Exhausted,
    Failed(SourceError),
}

struct ActiveSession {
    generation: u64,
    control: mpsc::Sender<Control>,
    task: JoinHandle<()>,
    gate: Gate,
}

impl ActiveSession {
    fn spawn(shared: Arc<Shared>, generation: u64, adapter: SourceAdapter) -> Self {
        let (control_tx, control_rx) = mpsc::channel(4);
        let gate = Gate::default();
        let task = tokio::spawn(run_session(
            shared,
            generation,
            adapter,
            control_rx,
            gate.clone(),
        ));
        Self {
            generation,
            control: control_tx,
            task,
            gate,
        }
    }

    /// Stop the producer, drain the pipeline, give up after `drain_timeout`
    async fn shutdown(mut self, drain_timeout: Duration) {
        let _ = self.control.send(Control::Stop).await;
        if tokio::time::timeout(drain_timeout, &mut self.task).await.is_err() {
            log::warn!(
                "Session {} did not drain within {:?}, discarding in-flight events",
                self.generation,
                drain_timeout
            );
            self.gate.close();
            self.task.abort();
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    generation: u64,
    first: SourceAdapter,
    mut control: mpsc::Receiver<Control>,
    gate: Gate,
) {
    let (tx, rx) = mpsc::channel(shared.settings.queue_capacity);
    let pipeline = tokio::spawn(Pipeline::new(shared.clone(), gate).run(rx));

    let mut next = Some(first);
    let end = loop {
        let Some(adapter) = next.take() else {
            break SessionEnd::Stopped;
        };

        let stop = StopSignal::new();
        let emitter = Emitter::new(tx.clone(), shared.config.clone(), adapter.origin());
        let mut producer = tokio::spawn(adapter.run(emitter, stop.clone()));

        let step = tokio::select! {
            joined = &mut producer => Step::Finished(joined.unwrap_or_else(|e| {
                SourceOutcome::Failed(SourceError::Read(format!("producer task failed: {}", e)))
            })),
            command = control.recv() => Step::Command(command),
        };

        match step {
            Step::Finished(SourceOutcome::Cancelled) => break SessionEnd::Stopped,
            Step::Finished(SourceOutcome::Exhausted) => break SessionEnd::Exhausted,
            Step::Finished(SourceOutcome::Failed(err)) => break SessionEnd::Failed(err),
            Step::Command(Some(Control::Restart {
                adapter,
                config,
                done,
            })) => {
                stop.set();
                let _ = producer.await;
                let revision = shared.config.store(config);
                log::info!(
                    "Session {} restarted source ({}) at config revision {}",
                    generation,
                    adapter.origin(),
                    revision
                );
                let _ = done.send(revision);
                next = Some(adapter);
            }
            Step::Command(Some(Control::Stop)) | Step::Command(None) => {
                stop.set();
                let _ = producer.await;
                break SessionEnd::Stopped;
            }
        }
    };

    drop(tx);
    let _ = pipeline.await;
    shared.session_ended(generation, end);
}

enum Step {
    Finished(SourceOutcome),
    Command(Option<Control>),
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct SessionController {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        settings: EngineSettings,
        classifier: Arc<dyn Classifier>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Self {
        let broadcaster = Broadcaster::new(settings.subscriber_backlog, settings.overflow_policy);
        let classifier = BoundedClassifier::new(
            classifier,
            settings.classifier_max_pending,
            settings.classifier_timeout,
        );
        let shared = Shared {
            settings,
            classifier,
            backend,
            config: Arc::new(ConfigCell::new(CaptureConfig::default())),
            lifecycle: RwLock::new(Lifecycle {
                state: SessionState::Idle,
                generation: 0,
                last_error: None,
                interface: None,
            }),
            telemetry: buffer::telemetry_buffer(),
            alerts: buffer::alert_buffer(),
            broadcaster,
            reporter: StatusReporter::new(),
            sequence: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
            active: Mutex::new(None),
        }
    }

    /// Heuristic classifier and the host's default capture backend
    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::new(settings, Arc::new(HeuristicClassifier::new()), default_backend())
    }

    fn known_interfaces(&self) -> Vec<String> {
        self.shared
            .backend
            .list_interfaces()
            .into_iter()
            .map(|i| i.name)
            .collect()
    }

    /// Start a capture session
    pub async fn start(&self, config: CaptureConfig) -> SessionResult<()> {
        let mut active = self.active.lock().await;

        config.validate()?;
        config.validate_interface(&self.known_interfaces())?;

        let state = self.shared.state();
        if !matches!(state, SessionState::Idle | SessionState::Error) {
            return Err(SessionError::AlreadyRunning);
        }

        let adapter = SourceAdapter::for_config(
            &config,
            self.shared.backend.clone(),
            self.shared.settings.retry,
        )?;

        // A session that ended on its own still holds its task handle
        if let Some(previous) = active.take() {
            previous.shutdown(self.shared.settings.drain_timeout).await;
        }

        self.shared.reporter.reset();
        self.shared.telemetry.clear();
        self.shared.alerts.clear();
        self.shared.sequence.store(0, Ordering::SeqCst);

        let mode = config.mode;
        let revision = self.shared.config.store(config);
        let generation = {
            let mut lifecycle = self.shared.lifecycle.write();
            lifecycle.state = SessionState::Starting;
            lifecycle.generation += 1;
            lifecycle.last_error = None;
            lifecycle.interface = adapter.interface().map(str::to_string);
            lifecycle.generation
        };

        log::info!(
            "Starting capture session {} (mode: {}, classifier: {}, revision: {})",
            generation,
            mode,
            self.shared.classifier.name(),
            revision
        );

        // Running before spawn: a source that ends at once must find Running
        self.shared.set_state(SessionState::Running);
        *active = Some(ActiveSession::spawn(self.shared.clone(), generation, adapter));
        Ok(())
    }

    /// Stop the session; always succeeds
    pub async fn stop(&self) -> SessionResult<()> {
        let mut active = self.active.lock().await;
        let drain_timeout = self.shared.settings.drain_timeout;

        match self.shared.state() {
            SessionState::Idle => {
                if let Some(finished) = active.take() {
                    finished.shutdown(drain_timeout).await;
                }
                log::debug!("Stop requested while idle");
            }
            SessionState::Error => {
                if let Some(failed) = active.take() {
                    failed.shutdown(drain_timeout).await;
                }
                let mut lifecycle = self.shared.lifecycle.write();
                lifecycle.state = SessionState::Idle;
                lifecycle.last_error = None;
                log::info!("Cleared failed capture session");
            }
            SessionState::Starting | SessionState::Running | SessionState::Stopping => {
                self.shared.set_state(SessionState::Stopping);
                if let Some(session) = active.take() {
                    session.shutdown(drain_timeout).await;
                }
                self.shared.set_state(SessionState::Idle);
                log::info!(
                    "Capture session stopped ({} events, {} alerts)",
                    self.shared.reporter.total_accepted(),
                    self.shared.reporter.total_alerts()
                );
            }
        }
        Ok(())
    }

    /// Apply a partial config change
    pub async fn reconfigure(&self, patch: ConfigPatch) -> SessionResult<()> {
        let active = self.active.lock().await;

        let state = self.shared.state();
        if !matches!(state, SessionState::Running | SessionState::Idle) {
            return Err(SessionError::NotRunning);
        }

        let current = self.shared.config.load();
        let next = current.config.merged(&patch);
        next.validate()?;
        next.validate_interface(&self.known_interfaces())?;

        let restart = state == SessionState::Running && current.config.requires_restart(&next);
        let session = active.as_ref().filter(|_| restart);

        let Some(session) = session else {
            if state == SessionState::Idle {
                self.shared.lifecycle.write().interface = next.interface_name().map(str::to_string);
            }
            let revision = self.shared.config.store(next);
            log::info!("Config updated to revision {}", revision);
            return Ok(());
        };

        let adapter = SourceAdapter::for_config(
            &next,
            self.shared.backend.clone(),
            self.shared.settings.retry,
        )?;
        let interface = adapter.interface().map(str::to_string);

        let (done_tx, done_rx) = oneshot::channel();
        let sent = session
            .control
            .send(Control::Restart {
                adapter,
                config: next.clone(),
                done: done_tx,
            })
            .await;

        let acked = match sent {
            Ok(()) => done_rx.await.ok(),
            Err(_) => None,
        };

        match acked {
            Some(revision) => {
                self.shared.lifecycle.write().interface = interface;
                log::info!("Config updated to revision {} with source restart", revision);
            }
            None => {
                // Session ended on its own in the meantime; keep the config
                let revision = self.shared.config.store(next);
                log::warn!(
                    "Session ended before restart, config stored as revision {}",
                    revision
                );
            }
        }
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        let snapshot = self.shared.config.load();
        let counters = self.shared.reporter.snapshot();
        let lifecycle = self.shared.lifecycle.read();

        SessionStatus {
            state: lifecycle.state,
            is_capturing: matches!(
                lifecycle.state,
                SessionState::Starting | SessionState::Running
            ),
            mode: snapshot.config.mode,
            interface: lifecycle
                .interface
                .clone()
                .or_else(|| snapshot.config.interface_name().map(str::to_string)),
            privacy_mode: snapshot.config.privacy_mode,
            alert_threshold: snapshot.config.alert_threshold,
            config_revision: snapshot.revision,
            total_accepted: counters.total_accepted,
            total_alerts: counters.total_alerts,
            total_unclassified: counters.total_unclassified,
            alerts_last_hour: counters.alerts_last_hour,
            telemetry_buffer: self.shared.telemetry.status(),
            alert_buffer: self.shared.alerts.status(),
            subscribers: self.shared.broadcaster.subscriber_count(),
            last_error: lifecycle.last_error.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_capturing(&self) -> bool {
        matches!(
            self.shared.state(),
            SessionState::Starting | SessionState::Running
        )
    }

    /// Active config (the last one applied)
    pub fn config(&self) -> CaptureConfig {
        self.shared.config.load().config.clone()
    }

    pub fn list_interfaces(&self) -> Vec<InterfaceInfo> {
        self.shared.backend.list_interfaces()
    }

    /// Live stream of events and alerts; survives session restarts
    pub fn subscribe(&self) -> Subscription {
        self.shared.broadcaster.subscribe()
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, n: usize) -> Vec<NetworkEvent> {
        self.shared.telemetry.recent(n)
    }

    /// Most recent alerts, newest first
    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.shared.alerts.recent(n)
    }
}
