//! Hub websocket wire protocol.
//!
//! The hub speaks message-framed JSON over a persistent websocket. The
//! handshake is: server sends `auth_required`, client answers `auth` with
//! its access token, server replies `auth_ok` or `auth_invalid`. After a
//! successful handshake the client issues an id-correlated
//! `subscribe_events` request, receives a `result` ack, and from then on
//! the server pushes `event` frames. `ping`/`pong` frames carry the
//! keepalive independently of event delivery.

use hearth_core::RawEvent;
use serde::{Deserialize, Serialize};

/// The event type the pipeline subscribes to.
pub const STATE_CHANGED: &str = "state_changed";

/// Messages the client sends to the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        event_type: &'static str,
    },
    Ping {
        id: u64,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages the hub pushes to the client.
///
/// Unknown message types map to [`ServerMessage::Unknown`] so a hub
/// upgrade cannot kill the read loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        #[serde(default)]
        version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<ResultError>,
    },
    Event {
        #[allow(dead_code)]
        id: u64,
        event: RawEvent,
    },
    Pong {
        id: u64,
    },
    #[serde(other)]
    Unknown,
}

/// Error payload inside a failed `result` frame.
#[derive(Debug, Default, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ResultError {
    pub fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "unspecified error".to_string(),
        }
    }
}
