//! Error taxonomy shared by the matching engine, the preference store and the
//! session protocol.
//!
//! Every variant carries a stable `code()` which is what a connected client
//! sees in an `{"type": "error", "error": <code>}` reply.

use thiserror::Error;

/// Errors surfaced by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A filter criteria payload did not have the expected shape.
    #[error("invalid filter specification: {0}")]
    InvalidFilterSpec(String),

    /// A time interval whose start lies after its end.
    #[error("invalid time interval: {0}")]
    InvalidTimeInterval(String),

    /// A profile referenced a time slot or filter owned by somebody else.
    #[error("{kind} {id} is not owned by user {owner}")]
    OwnershipViolation {
        kind: &'static str,
        id: u64,
        owner: u64,
    },

    /// A uniqueness constraint was violated on save.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The connection presented no valid identity.
    #[error("unauthorized")]
    Unauthorized,

    /// An inbound command could not be understood.
    #[error("protocol error: {0}")]
    ProtocolError(ProtocolErrorKind),

    /// A referenced object does not exist for the requesting identity.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
}

/// The flavours of inbound protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Well-formed JSON with an `action` nobody handles.
    UnknownAction,
    /// Not a JSON object, or missing fields for a known action.
    MalformedMessage,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProtocolErrorKind::UnknownAction => "unknown_action",
            ProtocolErrorKind::MalformedMessage => "malformed_message",
        })
    }
}

impl Error {
    /// The client-visible error code.
    pub fn code(&self) -> String {
        match self {
            Error::InvalidFilterSpec(_) => "invalid_filter_spec".to_string(),
            Error::InvalidTimeInterval(_) => "invalid_time_interval".to_string(),
            Error::OwnershipViolation { .. } => "ownership_violation".to_string(),
            Error::Conflict(_) => "conflict".to_string(),
            Error::Unauthorized => "unauthorized".to_string(),
            Error::ProtocolError(kind) => kind.to_string(),
            Error::NotFound { .. } => "not_found".to_string(),
            Error::Store(_) => "internal_error".to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
