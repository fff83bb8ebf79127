use std::time::Duration;
use thiserror::Error;

/// Categorizes errors for logging and metrics decisions.
///
/// This is a lightweight, cloneable representation of the error type
/// that the stream worker uses to decide how to account for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket protocol error
    WebSocket,
    /// Connection failed (refused, DNS, TLS, handshake)
    ConnectionFailed,
    /// Connection attempt exceeded its timeout
    Timeout,
    /// Endpoint or request could not be built
    InvalidEndpoint,
    /// Persisted storage error
    Storage,
    /// JSON encoding or decoding error
    Serialization,
    /// Stream ended by the remote side
    StreamClosed,
}

/// Errors that can occur in fleet-tracker
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection attempt failed
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Connection attempt timed out
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint URL could not be turned into a stream request
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Storage key contains characters the backend cannot represent
    #[error("Invalid storage key '{0}'")]
    InvalidStorageKey(String),

    /// JSON encoding or decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote side closed the stream
    #[error("Stream closed by remote")]
    StreamClosed,
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
            Error::Storage(_) | Error::InvalidStorageKey(_) => ErrorKind::Storage,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::StreamClosed => ErrorKind::StreamClosed,
        }
    }

    /// Whether this error came from the transport layer (as opposed to
    /// storage or local request building).
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::WebSocket
                | ErrorKind::ConnectionFailed
                | ErrorKind::Timeout
                | ErrorKind::StreamClosed
        )
    }
}
