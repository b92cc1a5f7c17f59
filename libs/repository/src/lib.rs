//! # Indexed Repository
//!
//! Two logically separate stores hold the rows the gateway keeps about its
//! connections:
//!
//! - [`EdgeStore`]: `Edge` and `EdgeRpc` rows
//! - [`ServiceStore`]: `Service`, `ServiceRpc`, and `ServiceTopic` rows
//!
//! The bound managers write rows as connections come and go; the control
//! plane reads them back with composable queries (see [`query`]). The live
//! maps inside the managers stay authoritative for routing, so a failing
//! store never tears a connection down on its own.
//!
//! Both stores are traits so an embedder can back them with something other
//! than the in-memory implementations shipped here.

pub mod edge;
mod index;
pub mod query;
pub mod service;

pub use edge::{EdgeStore, MemoryEdgeStore};
pub use query::{
    EdgeOrder, EdgeQuery, Page, RpcQuery, ServiceOrder, ServiceQuery, TimeRange, TopicQuery,
};
pub use service::{MemoryServiceStore, ServiceStore};

use thiserror::Error;
use types::FrontierError;

/// Repository errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("empty address")]
    EmptyAddress,

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl From<RepositoryError> for FrontierError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => FrontierError::RecordNotFound,
            RepositoryError::EmptyAddress => FrontierError::EmptyAddress,
            RepositoryError::Storage(message) => FrontierError::Repository(message),
        }
    }
}
