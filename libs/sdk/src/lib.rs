//! # Frontier SDK
//!
//! Clients for the two sides of a Frontier gateway, plus a cluster client
//! for services that talk to edges spread over many gateways.
//!
//! - [`EdgeClient`]: dials the edge port; calls and publishes reach whatever
//!   service serves the method or topic
//! - [`ServiceClient`]: dials the service port; every call, publish, and
//!   stream names the edge it is for
//! - [`ClusterService`]: one service identity across every gateway the
//!   locator knows about
//!
//! ## Peer Tag
//!
//! A service never sees raw tags. [`ServiceClient`] appends the target edge
//! id to outgoing `custom` bytes and strips it from everything inbound,
//! handing the id to handlers separately:
//!
//! ```text
//! handler(edge_id = 42, custom = "abc")  ◀── strip ──  "abc" ‖ 00..2a
//! call(42, custom = "abc")               ── append ─▶  "abc" ‖ 00..2a
//! ```
//!
//! ## Errors
//!
//! Everything returns [`types::FrontierError`], so callers can tell an edge
//! that went away (`EdgeNotOnline`) from a missing service or RPC.

pub mod cluster;
pub mod edge;
pub mod locator;
pub mod service;

pub use cluster::{ClusterService, ConnectorDialer, FrontierDialer};
pub use edge::{EdgeClient, EdgeOptions};
pub use locator::{FrontierLocator, HttpLocator};
pub use service::{
    service_fn, stream_edge_id, ServiceClient, ServiceHandler, ServiceMessage, ServiceOptions,
};

pub use network::{Cnss, Message, Request, Response, Stream};
pub use types::{FrontierError, Result};
