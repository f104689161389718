//! Server error types.

use crate::session::SessionError;
use thiserror::Error;
use wialon_protocol::ErrorKind;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] wialon_protocol::ProtocolError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns the stable error kind, used as a metric label.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Io(_) => ErrorKind::IoError,
            ServerError::Protocol(e) => e.kind(),
            ServerError::Session(e) => e.kind(),
            ServerError::Metrics(_) => ErrorKind::IoError,
            ServerError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Returns whether the error was caused by the peer's traffic rather than
    /// by the transport or the server itself.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ServerError::Protocol(_) | ServerError::Session(_))
    }
}
