//! Error definitions and the input-source type shared by the hijack subsystem.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::net::connection::ConnectionId;

/// Raw byte source forwarded into a hijacked connection.
pub type InputSource = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Errors that can occur while executing or hijacking a request.
#[derive(Debug, Error)]
pub enum HijackError {
    /// A dispatch input was unusable; raised before any I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The server did not accept the upgrade.
    #[error("Expected 101 Switching Protocols, got: {status}")]
    Protocol {
        /// Status code the server answered with.
        status: u16,
        /// Drained response body (usually a JSON error message).
        body: Bytes,
    },

    /// Read or write failure on the underlying transport.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The server sent bytes that are not a valid HTTP/1.1 response.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The connection was closed while (or before) the operation ran.
    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// A second upgrade was attempted on the same connection.
    #[error("Connection {0} is already hijacked")]
    AlreadyHijacked(ConnectionId),

    /// The relay task panicked or was aborted.
    #[error("Relay task failed: {0}")]
    Relay(String),

    /// No response arrived within the handshake wait.
    #[error("No response within {0} ms, upgrade not established")]
    NoUpgrade(u64),

    /// A resource call got a status other than the one it expects.
    #[error("Unexpected status {actual} from {uri}, expected {expected}")]
    UnexpectedStatus {
        uri: String,
        expected: u16,
        actual: u16,
        body: Bytes,
    },

    /// Request could not be built.
    #[error("Invalid request: {0}")]
    Http(#[from] http::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HijackError {
    /// Status code carried by a rejected upgrade or an unexpected response.
    pub fn status(&self) -> Option<u16> {
        match self {
            HijackError::Protocol { status, .. } => Some(*status),
            HijackError::UnexpectedStatus { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// Whether this error only reports that the connection was closed underneath.
    pub fn is_closed(&self) -> bool {
        matches!(self, HijackError::ConnectionClosed(_))
    }
}

/// Result type for hijack operations.
pub type HijackResult<T> = Result<T, HijackError>;
