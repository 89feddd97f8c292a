use std::io;

use thiserror::Error;

/// Result type for isolink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking across contexts
#[derive(Error, Debug)]
pub enum Error {
    /// The link or the context on the other side is gone.
    ///
    /// Explicit close, peer termination and local teardown are all reported
    /// this way.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol violation in {state}: {detail}")]
    ProtocolViolation { state: &'static str, detail: String },

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("service {id} failed to start: {reason}")]
    ServiceStart { id: String, reason: String },

    #[error("service not available: {0}")]
    ServiceUnavailable(String),

    #[error("pipe error: {0}")]
    Pipe(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
}

impl Error {
    pub(crate) fn violation(state: &'static str, detail: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            state,
            detail: detail.into(),
        }
    }

    /// Whether this error means the underlying link can no longer be used
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}
