//! # Frontier Shared Types
//!
//! Types shared by every crate of the gateway: identifiers and id sources,
//! the repository rows, the locator records, the 8-byte peer tag helpers,
//! the service selection policy, and the error-kind vocabulary that crosses
//! the wire.
//!
//! ## Peer Tag
//!
//! ```text
//! service ──custom‖edge_id──▶ exchange ──custom──▶ edge
//! edge    ──custom──▶ exchange ──custom‖edge_id──▶ service
//! ```
//!
//! The last 8 bytes of `custom` carry the big-endian edge id whenever an
//! envelope crosses the gateway and the far side needs to know its peer.

pub mod collections;
pub mod error;
pub mod hash;
pub mod ids;
pub mod model;
pub mod tag;

pub use collections::{BiMap, MapMap};
pub use error::{FrontierError, Result};
pub use hash::{select_index, HashPolicy};
pub use ids::{IdSource, MonotonicIdSource, SequenceIdSource};
pub use model::*;
pub use tag::{append_edge_id, split_edge_id, TAG_LEN};

/// Reserved RPC: resolve an edge id from handshake meta.
pub const RPC_GET_EDGE_ID: &str = "get_edge_id";
/// Reserved RPC: an edge came online.
pub const RPC_EDGE_ONLINE: &str = "edge_online";
/// Reserved RPC: an edge went offline.
pub const RPC_EDGE_OFFLINE: &str = "edge_offline";

/// Frontier → Frontlas reports. Edge online/offline reuse the names above.
pub const RPC_EDGE_HEARTBEAT: &str = "edge_heartbeat";
pub const RPC_SERVICE_ONLINE: &str = "service_online";
pub const RPC_SERVICE_OFFLINE: &str = "service_offline";
pub const RPC_SERVICE_HEARTBEAT: &str = "service_heartbeat";
pub const RPC_FRONTIER_STATS: &str = "frontier_stats";

/// Wildcard topic that catches publishes no sink claimed.
pub const WILDCARD_TOPIC: &str = "*";

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
