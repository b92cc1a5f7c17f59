//! Transport Error Types
//!
//! Errors raised by framing, handshakes, and the per-stream RPC and publish
//! machinery. `Remote` carries the error string a peer answered with; every
//! other variant means the connection itself (or the local side) failed.

use thiserror::Error;
use types::FrontierError;

/// Main transport error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// I/O failure on the underlying byte stream
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed or unexpected frames
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The acceptor refused the handshake
    #[error("Handshake rejected: {0}")]
    Rejected(String),

    /// Operation deadline exceeded
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The end, stream, or listener is closed
    #[error("closed")]
    Closed,

    /// Error string answered by the peer
    #[error("{0}")]
    Remote(String),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// The "closed" sentinel that ends accept and receive loops quietly
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// True when the connection itself failed rather than the peer's handler
    pub fn is_transport_level(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset => Self::Closed,
            _ => Self::Network(err.to_string()),
        }
    }
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<TransportError> for FrontierError {
    fn from(err: TransportError) -> Self {
        match err {
            // A peer's transport failure is not ours; only local failures map to Transport
            TransportError::Remote(message) => match FrontierError::from_wire(&message) {
                FrontierError::Transport(_) => FrontierError::Remote(message),
                kind => kind,
            },
            TransportError::Rejected(reason) => FrontierError::from_wire(&reason),
            TransportError::Timeout { operation, .. } => FrontierError::Timeout(operation),
            other => FrontierError::Transport(other.to_string()),
        }
    }
}
