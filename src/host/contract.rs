//! Wire types for the host bridge.
//!
//! One JSON object per line in each direction. Requests carry a
//! caller-chosen `request_id` and a `command`:
//!
//! ```text
//! {"request_id":"7","command":"toggle","service":"node"}
//! {"request_id":"8","command":"status"}
//! {"request_id":"9","command":"say","transcript":"restart the tunnel"}
//! {"request_id":"10","command":"quit"}
//! ```
//!
//! The host answers each request with a [`ResponseEnvelope`] and pushes
//! [`EventEnvelope`]s on its own (`ready`, `status`, `shutdown`).

use crate::control::ServiceAction;
use crate::status::ServiceKind;
use serde::{Deserialize, Serialize};

/// Request id used when a line could not be parsed far enough to find one.
pub const PARSE_ERROR_ID: &str = "parse-error";

/// A request from the menu-bar shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub command: HostCommand,
}

/// Commands accepted over the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    Toggle { service: ServiceKind },
    Start { service: ServiceKind },
    Stop { service: ServiceKind },
    Restart { service: ServiceKind },
    /// Poll now and return the snapshot.
    Status,
    /// Handle a transcript like the voice pipeline would.
    Say { transcript: String },
    /// Tear down and exit the bridge.
    Quit,
}

impl HostCommand {
    /// The service and action for control commands.
    #[must_use]
    pub fn control(&self) -> Option<(ServiceKind, ServiceAction)> {
        match *self {
            Self::Toggle { service } => Some((service, ServiceAction::Toggle)),
            Self::Start { service } => Some((service, ServiceAction::Start)),
            Self::Stop { service } => Some((service, ServiceAction::Stop)),
            Self::Restart { service } => Some((service, ServiceAction::Restart)),
            Self::Status | Self::Say { .. } | Self::Quit => None,
        }
    }
}

/// Answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Successful response carrying `payload`.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Failed response with a message and a null payload.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Unsolicited message from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}
