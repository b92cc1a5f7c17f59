//! Logical streams.
//!
//! Every end multiplexes any number of streams over its connection. Stream
//! `0` is the end itself; the rest are opened with `open_stream` by either
//! side. A stream carries RPCs, acknowledged publishes, and raw byte frames,
//! each with its own queue.
//!
//! ## Request Serving
//!
//! Inbound requests are queued per stream and served one at a time by a
//! worker task, so order within a stream is preserved end to end. The worker
//! holds requests until the stream is *ready*: a handler or hijacker was
//! installed, or [`Stream::activate`] was called. The dialing side's stream
//! `0` starts ready; every other stream waits, which lets the owner of an
//! accepted end or stream install its hijacker before the first request is
//! looked at.
//!
//! ## Back-pressure
//!
//! Inbound queues are bounded. A full publish or raw queue parks the
//! connection's reader until the consumer catches up, so a slow consumer
//! throttles its peer through the transport. A full request queue answers
//! the overflowing request with [`QUEUE_FULL`] instead, since a stream that
//! never becomes ready would otherwise park its whole connection.

use crate::frame::Frame;
use crate::message::{InboundMessage, Message};
use crate::rpc::{Request, RequestHandler, Response};
use crate::session::Session;
use crate::{Result, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender, UnboundedSender};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tracing::debug;
use types::FrontierError;

type Queued = (u64, Request);

/// Capacity of each per-stream inbound queue
pub const INBOUND_QUEUE: usize = 128;

/// Error answered for a request that found its stream's queue full
pub const QUEUE_FULL: &str = "request queue full";

pub(crate) struct StreamState {
    pub(crate) stream_id: u64,
    pub(crate) peer: String,
    pub(crate) meta: Bytes,
    outbound: UnboundedSender<Frame>,
    pending_calls: DashMap<u64, oneshot::Sender<Response>>,
    pending_acks: DashMap<u64, oneshot::Sender<Option<String>>>,
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    hijacker: RwLock<Option<Arc<dyn RequestHandler>>>,
    requests: Mutex<Option<Sender<Queued>>>,
    inbound_tx: Mutex<Option<Sender<InboundMessage>>>,
    inbound_rx: AsyncMutex<Receiver<InboundMessage>>,
    raw_tx: Mutex<Option<Sender<Bytes>>>,
    raw_rx: AsyncMutex<Receiver<Bytes>>,
    ready: watch::Sender<bool>,
    closed: watch::Sender<bool>,
}

impl StreamState {
    pub(crate) fn new(
        stream_id: u64,
        peer: String,
        meta: Bytes,
        ready: bool,
        outbound: UnboundedSender<Frame>,
    ) -> Arc<Self> {
        let (requests_tx, requests_rx) = mpsc::channel(INBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (raw_tx, raw_rx) = mpsc::channel(INBOUND_QUEUE);
        let (ready_tx, _) = watch::channel(ready);
        let (closed_tx, _) = watch::channel(false);

        let state = Arc::new(Self {
            stream_id,
            peer,
            meta,
            outbound: outbound.clone(),
            pending_calls: DashMap::new(),
            pending_acks: DashMap::new(),
            handlers: RwLock::new(HashMap::new()),
            hijacker: RwLock::new(None),
            requests: Mutex::new(Some(requests_tx)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: AsyncMutex::new(inbound_rx),
            raw_tx: Mutex::new(Some(raw_tx)),
            raw_rx: AsyncMutex::new(raw_rx),
            ready: ready_tx,
            closed: closed_tx,
        });

        tokio::spawn(serve_requests(
            Arc::downgrade(&state),
            state.ready.subscribe(),
            requests_rx,
            outbound,
        ));
        state
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Queue a request for the serving worker; `Err` carries the error to answer with
    pub(crate) fn enqueue_request(&self, request_id: u64, request: Request) -> std::result::Result<(), String> {
        let Some(tx) = self.requests.lock().clone() else {
            return Err(TransportError::Closed.to_string());
        };
        match tx.try_send((request_id, request)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!(stream_id = self.stream_id, request_id, "request queue full");
                Err(QUEUE_FULL.to_string())
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed.to_string()),
        }
    }

    pub(crate) fn resolve_call(&self, request_id: u64, response: Response) {
        if let Some((_, tx)) = self.pending_calls.remove(&request_id) {
            let _ = tx.send(response);
        }
    }

    pub(crate) fn resolve_ack(&self, message_id: u64, error: Option<String>) {
        if let Some((_, tx)) = self.pending_acks.remove(&message_id) {
            let _ = tx.send(error);
        }
    }

    /// Queue an inbound publish, waiting for room; a closed stream hands the message back
    pub(crate) async fn deliver(&self, message: InboundMessage) -> std::result::Result<(), InboundMessage> {
        let tx = self.inbound_tx.lock().clone();
        self.enqueue(tx, message).await
    }

    pub(crate) async fn push_raw(&self, data: Bytes) {
        let tx = self.raw_tx.lock().clone();
        let _ = self.enqueue(tx, data).await;
    }

    async fn enqueue<T>(&self, tx: Option<Sender<T>>, item: T) -> std::result::Result<(), T> {
        let Some(tx) = tx else {
            return Err(item);
        };
        tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(item);
                    Ok(())
                }
                Err(_) => Err(item),
            },
            _ = self.wait_closed() => Err(item),
        }
    }

    pub(crate) async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn handler_for(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        if let Some(hijacker) = self.hijacker.read().as_ref() {
            return Some(hijacker.clone());
        }
        self.handlers.read().get(method).cloned()
    }

    /// Local tear-down: fail pending calls and acks, close the queues
    pub(crate) fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(stream_id = self.stream_id, "stream closed");
        self.pending_calls.clear();
        self.pending_acks.clear();
        self.handlers.write().clear();
        *self.hijacker.write() = None;
        *self.requests.lock() = None;
        *self.inbound_tx.lock() = None;
        *self.raw_tx.lock() = None;
        self.ready.send_replace(true);
    }
}

async fn serve_requests(
    state: Weak<StreamState>,
    mut ready: watch::Receiver<bool>,
    mut requests: Receiver<Queued>,
    outbound: UnboundedSender<Frame>,
) {
    if ready.wait_for(|ready| *ready).await.is_err() {
        return;
    }

    while let Some((request_id, request)) = requests.recv().await {
        let (stream_id, handler) = match state.upgrade() {
            Some(state) if !state.is_closed() => (state.stream_id, state.handler_for(&request.method)),
            _ => break,
        };

        let response = match handler {
            Some(handler) => handler.handle(request).await,
            None => Response::error(FrontierError::RpcNotOnline),
        };

        let frame = Frame::Response {
            stream_id,
            request_id,
            data: response.data,
            custom: response.custom,
            error: response.error,
        };
        if outbound.send(frame).is_err() {
            break;
        }
    }
}

/// Removes a pending entry when the waiting future is dropped early
struct PendingGuard<'a, T> {
    map: &'a DashMap<u64, T>,
    id: u64,
}

impl<T> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// A handle to one logical stream. Cheap to clone.
#[derive(Clone)]
pub struct Stream {
    pub(crate) session: Arc<Session>,
    pub(crate) state: Arc<StreamState>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("client_id", &self.session.client_id)
            .field("stream_id", &self.state.stream_id)
            .field("peer", &self.state.peer)
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(session: Arc<Session>, state: Arc<StreamState>) -> Self {
        Self { session, state }
    }

    pub fn stream_id(&self) -> u64 {
        self.state.stream_id
    }

    /// Client id of the end this stream belongs to
    pub fn client_id(&self) -> u64 {
        self.session.client_id
    }

    /// Peer named by the side that opened the stream
    pub fn peer(&self) -> &str {
        &self.state.peer
    }

    /// Meta supplied by the side that opened the stream
    pub fn meta(&self) -> &Bytes {
        &self.state.meta
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Publish and wait for the peer's acknowledgement
    pub async fn publish(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        let message_id = self.session.next_id();
        let (tx, rx) = oneshot::channel();
        self.state.pending_acks.insert(message_id, tx);
        let _guard = PendingGuard {
            map: &self.state.pending_acks,
            id: message_id,
        };
        // a close racing the insert above leaves nobody to fail the entry
        self.ensure_open()?;

        self.session.send(Frame::Publish {
            stream_id: self.state.stream_id,
            message_id,
            topic: message.topic,
            data: message.data,
            custom: message.custom,
            cnss: message.cnss,
        })?;

        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(TransportError::Remote(err)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Issue a request and wait for its response
    pub async fn call(&self, request: Request) -> Result<Response> {
        self.ensure_open()?;
        let request_id = self.session.next_id();
        let (tx, rx) = oneshot::channel();
        self.state.pending_calls.insert(request_id, tx);
        let _guard = PendingGuard {
            map: &self.state.pending_calls,
            id: request_id,
        };
        self.ensure_open()?;

        self.session.send(Frame::Request {
            stream_id: self.state.stream_id,
            request_id,
            method: request.method,
            data: request.data,
            custom: request.custom,
        })?;

        match rx.await {
            Ok(Response { error: Some(err), .. }) => Err(TransportError::Remote(err)),
            Ok(response) => Ok(response),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Serve `method` locally and announce it to the peer
    pub fn register(&self, method: impl Into<String>, handler: impl RequestHandler) -> Result<()> {
        self.ensure_open()?;
        let method = method.into();
        self.state
            .handlers
            .write()
            .insert(method.clone(), Arc::new(handler));
        self.session.send(Frame::Register {
            stream_id: self.state.stream_id,
            method,
        })?;
        self.activate();
        Ok(())
    }

    /// Route every inbound request to `handler`, ahead of registered methods
    pub fn hijack(&self, handler: impl RequestHandler) -> Result<()> {
        self.ensure_open()?;
        *self.state.hijacker.write() = Some(Arc::new(handler));
        self.activate();
        Ok(())
    }

    /// Start serving queued requests with whatever handlers are installed
    pub fn activate(&self) {
        self.state.ready.send_replace(true);
    }

    /// Next inbound publish; `None` once the stream is closed and drained
    pub async fn receive(&self) -> Option<InboundMessage> {
        self.state.inbound_rx.lock().await.recv().await
    }

    pub async fn write_raw(&self, data: impl Into<Bytes>) -> Result<()> {
        self.ensure_open()?;
        self.session.send(Frame::Raw {
            stream_id: self.state.stream_id,
            data: data.into(),
        })
    }

    /// Next raw frame; `None` once the stream is closed and drained
    pub async fn read_raw(&self) -> Option<Bytes> {
        self.state.raw_rx.lock().await.recv().await
    }

    /// Close this stream; closing stream `0` closes the whole end
    pub fn close(&self) {
        if self.state.stream_id == 0 {
            self.session.shutdown();
            return;
        }
        if self.session.remove_stream(self.state.stream_id).is_some() {
            let _ = self.session.send(Frame::Close {
                stream_id: self.state.stream_id,
            });
        }
        self.state.shutdown();
    }

    /// Resolves once the stream is closed by either side
    pub async fn closed(&self) {
        self.state.wait_closed().await
    }
}
