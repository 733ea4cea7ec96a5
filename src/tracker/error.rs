//! Error types for the tracker connection and session.

use thiserror::Error;

/// Failures on an open connection. Fatal to the task that hits them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("connection closed by tracker")]
    ConnectionClosed,

    #[error("push mode is active; request/response exchanges are unavailable")]
    PushModeActive,

    #[error("connection has been closed")]
    Closed,
}

/// Failures while opening a session with the tracker.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not connect to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("status request failed: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("tracker returned status code {0}")]
    Status(u16),

    #[error("tracker is not calibrated")]
    NotCalibrated,

    #[error("status response has no `{0}` field")]
    MissingField(&'static str),

    #[error("status response field `{field}` is invalid: {value}")]
    InvalidField { field: &'static str, value: f64 },
}

/// Failures managing the background tasks of a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("ingestion is already running")]
    AlreadyIngesting,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
