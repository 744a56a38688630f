//! Core types for the a3s-relay system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a relay session
///
/// `Stopped` is terminal: a session that has been shut down is never
/// reconfigured within the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum SessionState {
    /// Created, no remote handle yet
    Unconfigured = 0,
    /// Webhook registration in progress
    Registering = 1,
    /// Registered and accepting events
    Running = 2,
    /// Shut down for the rest of the process lifetime
    Stopped = 3,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Unconfigured,
            1 => SessionState::Registering,
            2 => SessionState::Running,
            _ => SessionState::Stopped,
        }
    }

    /// Lowercase label used in logs and the status page
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Registering => "registering",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw webhook payload as delivered by the remote platform
///
/// The payload is opaque to the relay; only the remote endpoint decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Local identifier (evt-<uuid>) used for log correlation
    pub id: String,

    /// Unix timestamp in milliseconds when the event was received
    pub received_at: u64,

    /// The JSON body exactly as delivered
    pub payload: serde_json::Value,
}

impl InboundEvent {
    /// Wrap a raw payload with a fresh id and receive timestamp
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            received_at: now_millis(),
            payload,
        }
    }
}

/// A message decoded from an inbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    /// Platform update identifier
    pub update_id: i64,

    /// Chat the message was posted in
    pub chat_id: i64,

    /// Platform message identifier
    pub message_id: i64,

    /// Message text, if the message carries any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl IncomingMessage {
    /// Whether the text is the given bot command (`/cmd`, `/cmd@bot`, `/cmd args`)
    ///
    /// A command addressed with `@name` only matches when `name` is
    /// `bot_username` (case-insensitive). With no known username, any
    /// addressee is accepted.
    pub fn is_command(&self, command: &str, bot_username: Option<&str>) -> bool {
        let Some(text) = self.text.as_deref() else {
            return false;
        };
        let Some(first) = text.split_whitespace().next() else {
            return false;
        };
        let Some(name) = first.strip_prefix('/') else {
            return false;
        };
        let (name, addressee) = match name.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (name, None),
        };
        if name != command {
            return false;
        }
        match (addressee, bot_username) {
            (Some(addressee), Some(me)) => addressee.eq_ignore_ascii_case(me),
            _ => true,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
