//! # Frontlas
//!
//! Cluster locator for Frontier gateways. Every frontier keeps a connection
//! to the frontier plane and reports which edges and services it holds;
//! Frontlas records them in Redis with TTLs and answers "which frontier
//! serves edge N" for the cluster API and the cluster service SDK.
//!
//! ```text
//!  frontier ──(multiplexed transport)──▶ plane ──▶ store ◀── locator ◀── cluster api
//!                                                   ▲
//!                                    expiry watcher ┘
//! ```

pub mod api;
pub mod error;
pub mod keys;
pub mod locator;
pub mod plane;
pub mod server;
pub mod store;
pub mod watcher;

pub use error::{FrontlasError, Result};
pub use keys::Role;
pub use locator::Locator;
pub use plane::FrontierPlane;
pub use server::Frontlas;
pub use store::{ClusterStore, MemoryStore, RedisStore, Ttls};
