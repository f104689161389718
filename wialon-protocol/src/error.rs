//! Protocol error types and error kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or packet parsing.
///
/// Every variant is fatal to the connection that produced it: the dialect has
/// no reject frame, so the gateway closes the socket instead of replying.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed frame: {}", describe_field(.field, .reason))]
    MalformedFrame {
        /// Zero-based index of the offending body field, if the failure is field-local.
        field: Option<usize>,
        reason: String,
    },

    #[error("unknown packet type: {0:?}")]
    UnknownPacketType(String),

    #[error("malformed custom parameter #{index}: {raw:?}")]
    MalformedCustomParameter { index: usize, raw: String },
}

fn describe_field(field: &Option<usize>, reason: &str) -> String {
    match field {
        Some(index) => format!("field {}: {}", index, reason),
        None => reason.to_string(),
    }
}

impl ProtocolError {
    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame {
            field: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn field(index: usize, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedFrame {
            field: Some(index),
            reason: reason.into(),
        }
    }

    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            ProtocolError::MalformedFrame { .. } => ErrorKind::MalformedFrame,
            ProtocolError::UnknownPacketType(_) => ErrorKind::UnknownPacketType,
            ProtocolError::MalformedCustomParameter { .. } => ErrorKind::MalformedCustomParameter,
        }
    }
}

/// Stable error kinds, used as log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Framing and parsing
    FrameTooLarge,
    MalformedFrame,
    UnknownPacketType,
    MalformedCustomParameter,

    // Session
    NotAuthenticated,
    SessionClosed,

    // Transport
    IoError,
    ShuttingDown,
}

impl ErrorKind {
    /// Returns the label used for this kind in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FrameTooLarge => "FRAME_TOO_LARGE",
            ErrorKind::MalformedFrame => "MALFORMED_FRAME",
            ErrorKind::UnknownPacketType => "UNKNOWN_PACKET_TYPE",
            ErrorKind::MalformedCustomParameter => "MALFORMED_CUSTOM_PARAMETER",
            ErrorKind::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorKind::SessionClosed => "SESSION_CLOSED",
            ErrorKind::IoError => "IO_ERROR",
            ErrorKind::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
