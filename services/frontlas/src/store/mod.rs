//! # Cluster Store
//!
//! Where the locator keeps frontier registrations and edge/service
//! residency. Every record has a TTL and a shorter-lived `alive` companion;
//! when an `alive` key lapses the record is removed and the owning
//! frontier's counter is decremented in the same step.
//!
//! - [`RedisStore`]: the production store (standalone, sentinel, cluster)
//! - [`MemoryStore`]: same semantics in process, for tests and single-node
//!   embedding

use crate::error::Result;
use crate::keys::Role;
use async_trait::async_trait;
use std::time::Duration;
use types::{Frontier, FrontierMeta, FrontierStats, Residency};

pub mod connection;
pub mod memory;
pub mod redis_store;

pub use connection::RedisConnection;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Record lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttls {
    pub alive: Duration,
    pub edge_meta: Duration,
    pub service_meta: Duration,
    pub frontier_meta: Duration,
}

impl Default for Ttls {
    fn default() -> Self {
        Self::from(&frontier_config::Expiration::default())
    }
}

impl From<&frontier_config::Expiration> for Ttls {
    fn from(expiration: &frontier_config::Expiration) -> Self {
        Self {
            alive: Duration::from_secs(expiration.alive),
            edge_meta: Duration::from_secs(expiration.edge_meta),
            service_meta: Duration::from_secs(expiration.service_meta),
            frontier_meta: Duration::from_secs(expiration.frontier_meta),
        }
    }
}

impl Ttls {
    pub fn meta(&self, role: Role) -> Duration {
        match role {
            Role::Edge => self.edge_meta,
            Role::Service => self.service_meta,
        }
    }
}

/// A resident record with its id
pub type Resident = (u64, Residency);

#[async_trait]
pub trait ClusterStore: Send + Sync + 'static {
    /// Write the frontier row and its alive key; `true` when the row is new
    async fn create_frontier(&self, meta: &FrontierMeta) -> Result<bool>;

    /// Extend the frontier row and alive key; `ExpireFailed` when either is gone
    async fn refresh_frontier(&self, frontier_id: &str) -> Result<()>;

    async fn delete_frontier(&self, frontier_id: &str) -> Result<()>;

    /// Overwrite both counters of an existing frontier row
    async fn set_frontier_stats(&self, frontier_id: &str, stats: FrontierStats) -> Result<()>;

    async fn get_frontier(&self, frontier_id: &str) -> Result<Option<Frontier>>;

    /// Frontiers among `ids` that exist, in request order
    async fn get_frontiers(&self, ids: &[String]) -> Result<Vec<Frontier>>;

    /// One scan step; a returned cursor of `0` ends the scan
    async fn scan_frontiers(&self, cursor: u64, count: u64) -> Result<(Vec<Frontier>, u64)>;

    async fn count_frontiers(&self) -> Result<u64>;

    /// Write the residency and alive key, and count it on the frontier
    async fn set_resident(&self, role: Role, id: u64, residency: &Residency) -> Result<()>;

    /// Extend residency and alive key; `ExpireFailed` when either is gone
    async fn refresh_resident(&self, role: Role, id: u64) -> Result<()>;

    /// Remove a residency and decrement its frontier's counter.
    ///
    /// With `owner`, only a record held by that frontier is removed.
    /// Returns whether a record was removed.
    async fn delete_resident(&self, role: Role, id: u64, owner: Option<&str>) -> Result<bool>;

    async fn get_resident(&self, role: Role, id: u64) -> Result<Option<Residency>>;

    /// Residents among `ids` that exist, in request order
    async fn get_residents(&self, role: Role, ids: &[u64]) -> Result<Vec<Resident>>;

    async fn scan_residents(&self, role: Role, cursor: u64, count: u64) -> Result<(Vec<Resident>, u64)>;

    /// Sum of the role's counter over every frontier
    async fn count_residents(&self, role: Role) -> Result<u64>;
}
