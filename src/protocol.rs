//! JSON messages exchanged with WebSocket clients.
//!
//! Inbound messages are objects switched on their `action` field; outbound
//! messages are objects tagged by `type`.

use crate::core::Alert;
use crate::error::{Error, ProtocolErrorKind};
use serde::{Deserialize, Serialize};

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Snapshot of the newest open incidents.
    List,
    /// Join the active-incidents topic and receive a snapshot.
    Subscribe,
    /// Current matches of one of the caller's notification profiles.
    ProfileIncidents { profile: u64 },
    /// Open incidents an unsaved filter would match.
    PreviewFilter { filter: serde_json::Value },
}

const KNOWN_ACTIONS: [&str; 4] = ["list", "subscribe", "profile_incidents", "preview_filter"];

impl ClientCommand {
    /// Decodes a text frame.
    ///
    /// Distinguishes an unknown `action` from a message that is not valid
    /// JSON or lacks the fields its action needs.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|_| Error::ProtocolError(ProtocolErrorKind::MalformedMessage))?;
        let action = value
            .get("action")
            .and_then(serde_json::Value::as_str)
            .ok_or(Error::ProtocolError(ProtocolErrorKind::MalformedMessage))?;
        if !KNOWN_ACTIONS.contains(&action) {
            return Err(Error::ProtocolError(ProtocolErrorKind::UnknownAction));
        }
        serde_json::from_value(value)
            .map_err(|_| Error::ProtocolError(ProtocolErrorKind::MalformedMessage))
    }
}

/// Whether an alert event announces a new alert or a change to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Incidents {
        incidents: Vec<Alert>,
    },
    Subscribed {
        channel_name: String,
        start_incidents: Vec<Alert>,
    },
    Created {
        payload: Alert,
    },
    Modified {
        payload: Alert,
    },
    ProfileIncidents {
        profile: u64,
        incidents: Vec<Alert>,
    },
    FilterPreview {
        incidents: Vec<Alert>,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn event(kind: EventKind, alert: Alert) -> Self {
        match kind {
            EventKind::Created => ServerMessage::Created { payload: alert },
            EventKind::Modified => ServerMessage::Modified { payload: alert },
        }
    }

    pub fn error(error: &Error) -> Self {
        ServerMessage::Error { error: error.code() }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
