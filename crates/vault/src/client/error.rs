//! Structured protocol failures reported by a mail client

use thiserror::Error;

/// Reason code attached to every protocol failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolErrorKind {
    /// The connection was aborted under the command
    Abort,
    /// The server could not fetch the requested item(s)
    Unfetchable,
    /// The server could not parse the message content
    Unparseable,
    /// The server refused a pushed message
    AppendRejected,
    /// Anything else
    Other,
}

/// A failed protocol command
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Abort, message)
    }

    pub fn unfetchable(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Unfetchable, message)
    }

    pub fn unparseable(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Unparseable, message)
    }

    pub fn append_rejected(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::AppendRejected, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Other, message)
    }
}
