//! Start-up errors of the gateway process.

use frontier_config::ConfigError;
use network::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {section} listener on {addr}: {source}")]
    Bind {
        section: &'static str,
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("invalid {section} address {addr:?}")]
    Address { section: &'static str, addr: String },

    #[error("control plane error: {0}")]
    ControlPlane(#[from] hyper::Error),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;
