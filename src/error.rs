//! Crate-level error types

use crate::id::Id;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MuxError>;

/// Error type for mux operations
#[derive(Debug)]
pub enum MuxError {
    /// No session exists with the given ID
    UnknownSession(Id),
    /// No channel exists with the given ID
    UnknownChannel(Id),
    /// Inbound envelope failed to parse or violated the type-length rule
    BadEnvelope(String),
    /// JSON encoding failed while building an outbound envelope
    Encoding(serde_json::Error),
    /// Error surfaced verbatim from a message handler
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl MuxError {
    /// Wrap an arbitrary handler error
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MuxError::Handler(Box::new(err))
    }
}

impl std::fmt::Display for MuxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxError::UnknownSession(id) => write!(f, "Session does not exist: {}", id),
            MuxError::UnknownChannel(id) => write!(f, "Channel does not exist: {}", id),
            MuxError::BadEnvelope(reason) => write!(f, "Bad envelope: {}", reason),
            MuxError::Encoding(err) => write!(f, "JSON encoding failed: {}", err),
            MuxError::Handler(err) => write!(f, "Handler error: {}", err),
        }
    }
}

impl std::error::Error for MuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MuxError::Encoding(err) => Some(err),
            MuxError::Handler(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
