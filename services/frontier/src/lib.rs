//! # Frontier
//!
//! Bidirectional gateway between edges (devices, clients) and services
//! (backends). Edges and services both connect over the multiplexed
//! transport; the gateway assigns ids, keeps one live end per id, and routes
//! RPCs, publishes, and streams across.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────┐      ┌──────────┐      ┌──────────────┐
//!  edges ──▶ │ edgebound  │ ───▶ │ exchange │ ◀─── │ servicebound │ ◀── services
//!            └─────┬──────┘      └────┬─────┘      └──────┬───────┘
//!                  │                  │ mqm               │
//!                  ▼                  ▼                   ▼
//!             edge store         topic → sinks       service store
//!                  └──────────── informer ──────────────┘ ──▶ Frontlas
//! ```
//!
//! - [`edgebound`] and [`servicebound`] own their live maps and repository
//!   rows, and drive connection life-cycles.
//! - [`exchange`] is the routing core; it holds no entities.
//! - [`mq`] indexes service sinks by topic for edge publishes.
//! - [`informer`] reports life-cycle events to Frontlas, best-effort.
//! - [`control`] is the administrative surface.
//! - [`server`] wires everything together.
//!
//! ## Peer Tag
//!
//! Whatever crosses from an edge to a service carries the edge id as the
//! last 8 bytes of `custom`; whatever a service sends towards an edge must
//! carry it too, and the exchange strips it before the edge sees it.

pub mod apis;
pub mod bypass;
pub mod control;
pub mod edgebound;
pub mod error;
pub mod exchange;
pub mod informer;
pub mod mq;
pub mod server;
pub mod servicebound;

mod live;

pub use apis::{Edgebound, Exchange, Informer, Servicebound};
pub use control::{ControlPlane, StreamInfo};
pub use edgebound::{EdgeManager, EdgeboundOptions};
pub use error::{ServerError, ServerResult};
pub use exchange::Exchanger;
pub use informer::{FrontlasInformer, FrontlasInformerOptions, NoopInformer};
pub use mq::{MqManager, MqSink, ProduceOptions, ServiceSink};
pub use server::{Frontier, FrontierOptions};
pub use servicebound::ServiceManager;
