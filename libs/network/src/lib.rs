//! # Multiplexed Transport
//!
//! Carries tagged RPCs, acknowledged publishes, and raw byte frames over one
//! connection per peer, with any number of logical streams on top. Both
//! bounds of the gateway, the SDKs, and the locator's frontier plane speak
//! it.
//!
//! ## Architecture
//!
//! ```text
//! Connector ──dial──▶ [preface][Hello] ──▶ Listener ──▶ Acceptor
//!                                                    │
//!                     ◀── [Welcome | Reject] ────────┤ BoundDelegate::get_client_id
//!                                                    │ BoundDelegate::connection_online
//!        End ◀══════════ frames (stream 0..n) ══════▶ End
//! ```
//!
//! Each [`End`] owns a reader task and a writer task. Outbound frames go
//! through an unbounded queue so that no caller ever holds a lock across
//! socket I/O; inbound frames are routed to per-stream queues.
//!
//! ## Life-cycle Contract
//!
//! - The dialer writes the two-byte [`PREFACE`] and a `Hello`; the acceptor
//!   answers `Welcome{client_id}` or `Reject{reason}`.
//! - The acceptor calls `connection_online` before the end is handed out,
//!   and exactly one `connection_offline` after the connection is gone.
//! - [`Acceptor::accept`] returns `None` once the acceptor is closed. That is
//!   the quiet exit of a serve loop, never an error.
//! - Dialed ends send a heartbeat every `heartbeat_interval`; the acceptor
//!   forwards them to `BoundDelegate::heartbeat`.

pub mod acceptor;
pub mod delegate;
pub mod dialer;
pub mod end;
pub mod error;
pub mod frame;
pub mod listener;
pub mod message;
pub mod rpc;
pub mod stream;

mod session;

pub use acceptor::{Acceptor, AcceptorOptions};
pub use delegate::BoundDelegate;
pub use dialer::{dial, dial_io, DialOptions};
pub use end::End;
pub use error::{Result, TransportError};
pub use frame::{Frame, DEFAULT_MAX_FRAME_SIZE, PREFACE};
pub use listener::{
    Accepted, BoxedIo, Connector, Io, Listener, MemoryListener, MemoryNetwork, TcpConnector,
    TcpListener,
};
pub use message::{Cnss, InboundMessage, Message};
pub use rpc::{handler_fn, FnHandler, Request, RequestHandler, Response};
pub use stream::{Stream, INBOUND_QUEUE, QUEUE_FULL};
