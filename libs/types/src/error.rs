//! Error kinds shared across the gateway.
//!
//! Every kind renders to a stable string. RPC errors travel as strings, so a
//! kind raised on one side of the gateway is recovered on the other side
//! with [`FrontierError::from_wire`].

use thiserror::Error;

/// Gateway error kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrontierError {
    #[error("edge not online")]
    EdgeNotOnline,

    #[error("service not online")]
    ServiceNotOnline,

    #[error("rpc not online")]
    RpcNotOnline,

    #[error("topic not online")]
    TopicNotOnline,

    #[error("illegal edge id")]
    IllegalEdgeId,

    #[error("record not found")]
    RecordNotFound,

    #[error("empty address")]
    EmptyAddress,

    #[error("illegal request: {0}")]
    IllegalRequest(String),

    #[error("unsupported redis mode: {0}")]
    UnsupportedRedisMode(String),

    #[error("expire failed")]
    ExpireFailed,

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// An error string from the far side that names no known kind
    #[error("{0}")]
    Remote(String),
}

/// Result alias for gateway operations
pub type Result<T> = std::result::Result<T, FrontierError>;

const PREFIXED: &[(&str, fn(String) -> FrontierError)] = &[
    ("illegal request: ", FrontierError::IllegalRequest),
    ("unsupported redis mode: ", FrontierError::UnsupportedRedisMode),
    ("unimplemented: ", FrontierError::Unimplemented),
    ("timeout: ", FrontierError::Timeout),
    ("transport error: ", FrontierError::Transport),
    ("repository error: ", FrontierError::Repository),
    ("internal error: ", FrontierError::Internal),
];

impl FrontierError {
    /// Wire form of the error
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Recover a kind from its wire form
    pub fn from_wire(message: &str) -> Self {
        match message {
            "edge not online" => return Self::EdgeNotOnline,
            "service not online" => return Self::ServiceNotOnline,
            "rpc not online" => return Self::RpcNotOnline,
            "topic not online" => return Self::TopicNotOnline,
            "illegal edge id" => return Self::IllegalEdgeId,
            "record not found" => return Self::RecordNotFound,
            "empty address" => return Self::EmptyAddress,
            "expire failed" => return Self::ExpireFailed,
            _ => {}
        }
        for (prefix, build) in PREFIXED {
            if let Some(rest) = message.strip_prefix(prefix) {
                return build(rest.to_string());
            }
        }
        Self::Remote(message.to_string())
    }

    /// Routing misses are reported to the originating envelope, never fatal
    pub fn is_routing_miss(&self) -> bool {
        matches!(
            self,
            Self::EdgeNotOnline | Self::ServiceNotOnline | Self::RpcNotOnline | Self::TopicNotOnline
        )
    }
}
