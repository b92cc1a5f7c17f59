//! Ends: one handshaken connection and its root stream.

use crate::message::{InboundMessage, Message};
use crate::rpc::{Request, RequestHandler, Response};
use crate::stream::Stream;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;

/// One side of a gateway connection.
///
/// Every operation without a stream argument runs on stream `0`. Clones
/// share the same connection; [`End::same`] compares connection identity.
#[derive(Clone, Debug)]
pub struct End {
    root: Stream,
}

impl End {
    pub(crate) fn new(root: Stream) -> Self {
        Self { root }
    }

    /// Id assigned at handshake
    pub fn client_id(&self) -> u64 {
        self.root.session.client_id
    }

    /// Meta the dialing side sent at handshake
    pub fn meta(&self) -> &Bytes {
        &self.root.session.meta
    }

    /// Address of the far side
    pub fn remote_addr(&self) -> &str {
        &self.root.session.remote_addr
    }

    /// Network the connection runs on ("tcp", "mem")
    pub fn network(&self) -> &str {
        &self.root.session.network
    }

    /// True when both handles refer to the same connection
    pub fn same(&self, other: &End) -> bool {
        Arc::ptr_eq(&self.root.session, &other.root.session)
    }

    /// Stable identity of the connection for keyed lookups
    pub fn key(&self) -> usize {
        Arc::as_ptr(&self.root.session) as usize
    }

    /// The root stream
    pub fn stream(&self) -> &Stream {
        &self.root
    }

    pub async fn publish(&self, message: Message) -> Result<()> {
        self.root.publish(message).await
    }

    pub async fn call(&self, request: Request) -> Result<Response> {
        self.root.call(request).await
    }

    pub fn register(&self, method: impl Into<String>, handler: impl RequestHandler) -> Result<()> {
        self.root.register(method, handler)
    }

    pub fn hijack(&self, handler: impl RequestHandler) -> Result<()> {
        self.root.hijack(handler)
    }

    pub fn activate(&self) {
        self.root.activate()
    }

    pub async fn receive(&self) -> Option<InboundMessage> {
        self.root.receive().await
    }

    pub async fn write_raw(&self, data: impl Into<Bytes>) -> Result<()> {
        self.root.write_raw(data).await
    }

    pub async fn read_raw(&self) -> Option<Bytes> {
        self.root.read_raw().await
    }

    /// Open a stream to the far side; `peer` and `meta` are delivered with it
    pub async fn open_stream(&self, peer: impl Into<String>, meta: impl Into<Bytes>) -> Result<Stream> {
        self.root.session.open_stream(peer.into(), meta.into()).await
    }

    /// Next stream the far side opened; `None` once the end is closed
    pub async fn accept_stream(&self) -> Option<Stream> {
        self.root.session.accept_stream().await
    }

    /// Streams currently open on this end, excluding the root
    pub fn list_streams(&self) -> Vec<Stream> {
        self.root
            .session
            .list_streams()
            .into_iter()
            .map(|state| Stream::new(self.root.session.clone(), state))
            .collect()
    }

    pub fn close(&self) {
        self.root.session.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.root.session.is_closed()
    }

    /// Resolves once the connection is gone
    pub async fn closed(&self) {
        let mut closed = self.root.session.closed_watch();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}
