//! Logic Module - Capture & Alerting Engines
//!
//! ## Layout
//! - `session/` - Lifecycle controller and the per-session event pipeline
//! - `source/` - Source adapters (simulated, live capture, hybrid, log replay)
//! - `classifier`, `alert` - Scoring and alert emission
//! - `buffer`, `broadcast`, `status` - Recent history, fan-out, counters

pub mod alert;
pub mod broadcast;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod session;
pub mod source;
pub mod status;

pub use config::{CaptureConfig, CaptureMode, ConfigPatch, EngineSettings};
pub use error::{SessionError, SessionResult};
pub use session::{SessionController, SessionState, SessionStatus};
