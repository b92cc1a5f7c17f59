//! Seams between the gateway's components.
//!
//! The bounds and the exchange reference each other, so each side sees the
//! other only through these traits. The composition root wires concrete
//! implementations after construction.

use async_trait::async_trait;
use network::{End, Stream};
use types::Result;

/// Edge side of the gateway
pub trait Edgebound: Send + Sync + 'static {
    fn get_edge_by_id(&self, edge_id: u64) -> Option<End>;

    fn list_edges(&self) -> Vec<End>;

    fn count_edges(&self) -> usize;

    /// Streams open on the edge's connection
    fn list_streams(&self, edge_id: u64) -> Result<Vec<Stream>>;

    /// Admin kick; closes the connection
    fn del_edge_by_id(&self, edge_id: u64) -> Result<()>;
}

/// Service side of the gateway
pub trait Servicebound: Send + Sync + 'static {
    fn get_service_by_id(&self, service_id: u64) -> Option<End>;

    /// Any one live service with this name
    fn get_service_by_name(&self, name: &str) -> Result<End>;

    fn get_service_by_rpc(&self, rpc: &str) -> Result<End>;

    fn get_service_by_topic(&self, topic: &str) -> Result<End>;

    /// Every live service with this name, ordered by service id
    fn get_services_by_name(&self, name: &str) -> Result<Vec<End>>;

    fn get_services_by_rpc(&self, rpc: &str) -> Result<Vec<End>>;

    fn get_services_by_topic(&self, topic: &str) -> Result<Vec<End>>;

    fn list_services(&self) -> Vec<End>;

    fn count_services(&self) -> usize;

    fn del_service_by_id(&self, service_id: u64) -> Result<()>;

    fn del_services_by_name(&self, name: &str) -> Result<()>;
}

/// Routing core between the two bounds
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    /// Ask the `get_edge_id` service for an id; `ServiceNotOnline` when none serves it
    async fn get_edge_id(&self, meta: &[u8]) -> Result<u64>;

    /// Tell the `edge_online` service; `ServiceNotOnline` when none serves it
    async fn edge_online(&self, edge: &End) -> Result<()>;

    async fn edge_offline(&self, edge: &End) -> Result<()>;

    /// Start moving the edge's messages, RPCs, and streams to services
    fn forward_to_service(&self, edge: &End);

    /// Start moving the service's messages, RPCs, and streams to edges
    fn forward_to_edge(&self, service: &End);
}

/// Frontlas notifications; every call is best-effort and never blocks
pub trait Informer: Send + Sync + 'static {
    fn edge_online(&self, edge_id: u64, addr: &str);

    fn edge_offline(&self, edge_id: u64, addr: &str);

    fn edge_heartbeat(&self, edge_id: u64, addr: &str);

    fn service_online(&self, service_id: u64, addr: &str);

    fn service_offline(&self, service_id: u64, addr: &str);

    fn service_heartbeat(&self, service_id: u64, addr: &str);

    fn set_edge_count(&self, count: usize);

    fn set_service_count(&self, count: usize);
}
