//! Locator errors.

use frontier_config::ConfigError;
use network::TransportError;
use thiserror::Error;
use types::FrontierError;

#[derive(Debug, Error)]
pub enum FrontlasError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A refresh found the key already gone
    #[error("expire failed")]
    ExpireFailed,

    #[error("unsupported redis mode: {0}")]
    UnsupportedRedisMode(String),

    #[error("invalid address {0:?}")]
    Address(String),

    #[error("failed to bind {section} on {addr}: {source}")]
    Bind {
        section: &'static str,
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("http server error: {0}")]
    Http(#[from] hyper::Error),
}

pub type Result<T> = std::result::Result<T, FrontlasError>;

impl From<FrontlasError> for FrontierError {
    fn from(err: FrontlasError) -> Self {
        match err {
            FrontlasError::ExpireFailed => FrontierError::ExpireFailed,
            FrontlasError::UnsupportedRedisMode(mode) => FrontierError::UnsupportedRedisMode(mode),
            FrontlasError::Address(_) => FrontierError::EmptyAddress,
            FrontlasError::Redis(e) => FrontierError::Repository(e.to_string()),
            FrontlasError::Codec(e) => FrontierError::Repository(e.to_string()),
            other => FrontierError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_survive_conversion() {
        assert_eq!(FrontierError::from(FrontlasError::ExpireFailed), FrontierError::ExpireFailed);
        assert_eq!(
            FrontierError::from(FrontlasError::UnsupportedRedisMode("ring".to_string())),
            FrontierError::UnsupportedRedisMode("ring".to_string())
        );
    }
}
