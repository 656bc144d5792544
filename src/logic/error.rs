//! Error taxonomy
//!
//! Lifecycle errors are returned to the caller of a controller operation.
//! Adapter and classifier failures never reach a caller directly: they are
//! surfaced through `status()` and the session state.

use std::time::Duration;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors returned by `SessionController` operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Rejected before any state change
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("a capture session is already running")]
    AlreadyRunning,

    #[error("no capture session is running")]
    NotRunning,

    #[error("capture source unavailable: {0}")]
    AdapterUnavailable(String),
}

impl SessionError {
    /// Stable machine-readable code for the command layer
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidConfig(_) => "invalid_config",
            SessionError::AlreadyRunning => "already_running",
            SessionError::NotRunning => "not_running",
            SessionError::AdapterUnavailable(_) => "adapter_unavailable",
        }
    }
}

/// Failures raised inside a source adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Interface/file could not be opened (retryable for live capture)
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The feed broke after it was opened
    #[error("read failed: {0}")]
    Read(String),

    /// Reconnect budget spent
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl From<SourceError> for SessionError {
    fn from(err: SourceError) -> Self {
        SessionError::AdapterUnavailable(err.to_string())
    }
}

/// Non-fatal classification failures; the event degrades to unclassified
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier failed: {0}")]
    Failed(String),

    /// Every permit is held by a call that has not returned yet
    #[error("classifier busy: {0} calls still pending")]
    Saturated(usize),
}
