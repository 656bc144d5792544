//! Commands - Controller operations for external callers
//!
//! Thin wrappers over `SessionController` that turn lifecycle errors into
//! serializable payloads.

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::config::{CaptureConfig, ConfigPatch};
use crate::logic::error::SessionError;
use crate::logic::event::{Alert, NetworkEvent};
use crate::logic::session::{SessionController, SessionStatus};
use crate::logic::source::InterfaceInfo;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Error as seen by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable code, e.g. `invalid_config`
    pub kind: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: "bad_request".to_string(),
            message: message.into(),
        }
    }
}

impl From<SessionError> for ErrorPayload {
    fn from(err: SessionError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

pub type CommandResult<T> = Result<T, ErrorPayload>;

// ============================================================================
// LIFECYCLE COMMANDS
// ============================================================================

pub async fn start_capture(
    controller: &SessionController,
    config: CaptureConfig,
) -> CommandResult<String> {
    let mode = config.mode;
    controller.start(config).await?;
    Ok(format!("Capture started (mode: {})", mode))
}

pub async fn stop_capture(controller: &SessionController) -> CommandResult<String> {
    let was_capturing = controller.is_capturing();
    controller.stop().await?;
    Ok(if was_capturing {
        "Capture stopped".to_string()
    } else {
        "Capture was not running".to_string()
    })
}

pub async fn reconfigure_capture(
    controller: &SessionController,
    patch: ConfigPatch,
) -> CommandResult<String> {
    controller.reconfigure(patch).await?;
    Ok(format!(
        "Config applied (revision {})",
        controller.status().config_revision
    ))
}

// ============================================================================
// QUERY COMMANDS
// ============================================================================

pub fn get_status(controller: &SessionController) -> SessionStatus {
    controller.status()
}

pub fn list_interfaces(controller: &SessionController) -> Vec<InterfaceInfo> {
    controller.list_interfaces()
}

/// Newest first, at most the buffer capacity
pub fn recent_events(controller: &SessionController, limit: usize) -> Vec<NetworkEvent> {
    controller.recent_events(limit.min(constants::TELEMETRY_BUFFER_CAPACITY))
}

/// Newest first, at most the buffer capacity
pub fn recent_alerts(controller: &SessionController, limit: usize) -> Vec<Alert> {
    controller.recent_alerts(limit.min(constants::ALERT_BUFFER_CAPACITY))
}
