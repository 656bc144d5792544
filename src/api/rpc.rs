//! JSON-lines command surface
//!
//! One request per line, one response per line:
//!
//! ```text
//! {"cmd":"start","config":{"mode":"simulated"}}
//! {"ok":true,"message":"Capture started (mode: simulated)"}
//! {"cmd":"reconfigure","patch":{"alert_threshold":1.5}}
//! {"ok":false,"error":{"kind":"invalid_config","message":"..."}}
//! ```
//!
//! `subscribe` hands back a `Subscription`; the caller forwards its
//! messages as further lines.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::commands::{self, CommandResult, ErrorPayload};
use crate::logic::broadcast::Subscription;
use crate::logic::config::{CaptureConfig, ConfigPatch};
use crate::logic::error::SessionError;
use crate::logic::session::SessionController;

fn default_limit() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Start {
        #[serde(default)]
        config: CaptureConfig,
    },
    Stop,
    Reconfigure {
        patch: ConfigPatch,
    },
    Status,
    ListInterfaces,
    RecentEvents {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    RecentAlerts {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self {
                ok: true,
                message: None,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::error(ErrorPayload {
                kind: "internal".to_string(),
                message: format!("failed to encode response: {}", e),
            }),
        }
    }

    pub fn error(error: ErrorPayload) -> Self {
        Self {
            ok: false,
            message: None,
            data: None,
            error: Some(error),
        }
    }

    fn from_result(result: CommandResult<String>) -> Self {
        match result {
            Ok(message) => Self::message(message),
            Err(error) => Self::error(error),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"ok":false,"error":{{"kind":"internal","message":"{}"}}}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

/// What a request produced
pub struct Reply {
    pub response: Response,
    /// Set for `subscribe`
    pub subscription: Option<Subscription>,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            subscription: None,
        }
    }
}

/// Wire shape with the config payloads left untyped, so a malformed
/// command and a bad config value get different error kinds
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Envelope {
    Start {
        #[serde(default)]
        config: Option<serde_json::Value>,
    },
    Stop,
    Reconfigure {
        #[serde(default)]
        patch: Option<serde_json::Value>,
    },
    Status,
    ListInterfaces,
    RecentEvents {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    RecentAlerts {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    Subscribe,
}

fn config_value<T: serde::de::DeserializeOwned>(
    field: &str,
    value: serde_json::Value,
) -> Result<T, ErrorPayload> {
    serde_json::from_value(value).map_err(|e| {
        ErrorPayload::from(SessionError::InvalidConfig(format!("{}: {}", field, e)))
    })
}

pub fn parse_request(line: &str) -> Result<Request, ErrorPayload> {
    let envelope: Envelope = serde_json::from_str(line.trim())
        .map_err(|e| ErrorPayload::bad_request(format!("unrecognized request: {}", e)))?;

    Ok(match envelope {
        Envelope::Start { config } => Request::Start {
            config: match config {
                Some(value) => config_value("config", value)?,
                None => CaptureConfig::default(),
            },
        },
        Envelope::Stop => Request::Stop,
        Envelope::Reconfigure { patch } => {
            let value =
                patch.ok_or_else(|| ErrorPayload::bad_request("reconfigure needs a patch"))?;
            Request::Reconfigure {
                patch: config_value("patch", value)?,
            }
        }
        Envelope::Status => Request::Status,
        Envelope::ListInterfaces => Request::ListInterfaces,
        Envelope::RecentEvents { limit } => Request::RecentEvents { limit },
        Envelope::RecentAlerts { limit } => Request::RecentAlerts { limit },
        Envelope::Subscribe => Request::Subscribe,
    })
}

pub async fn dispatch(controller: &SessionController, request: Request) -> Reply {
    log::debug!("Command: {:?}", request);
    match request {
        Request::Start { config } => {
            Response::from_result(commands::start_capture(controller, config).await).into()
        }
        Request::Stop => Response::from_result(commands::stop_capture(controller).await).into(),
        Request::Reconfigure { patch } => {
            Response::from_result(commands::reconfigure_capture(controller, patch).await).into()
        }
        Request::Status => Response::data(&commands::get_status(controller)).into(),
        Request::ListInterfaces => Response::data(&commands::list_interfaces(controller)).into(),
        Request::RecentEvents { limit } => {
            Response::data(&commands::recent_events(controller, limit)).into()
        }
        Request::RecentAlerts { limit } => {
            Response::data(&commands::recent_alerts(controller, limit)).into()
        }
        Request::Subscribe => Reply {
            response: Response::message("subscribed"),
            subscription: Some(controller.subscribe()),
        },
    }
}

/// Copy a subscription onto a bounded line queue.
///
/// `send` waits when the queue is full, so a slow reader makes this
/// subscription lag and its overflow policy applies. Returns the number of
/// messages the subscriber missed.
pub async fn forward_stream(mut subscription: Subscription, out: mpsc::Sender<String>) -> u64 {
    while let Some(message) = subscription.recv().await {
        match serde_json::to_string(&message) {
            Ok(line) => {
                if out.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("Failed to encode {} message: {}", message.kind(), e),
        }
    }
    log::info!(
        "Subscriber detached ({} messages dropped)",
        subscription.dropped()
    );
    subscription.dropped()
}

/// Parse and run one input line
pub async fn handle_line(controller: &SessionController, line: &str) -> Reply {
    match parse_request(line) {
        Ok(request) => dispatch(controller, request).await,
        Err(error) => {
            log::warn!("Rejected command line: {}", error.message);
            Response::error(error).into()
        }
    }
}
