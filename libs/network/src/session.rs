//! One connection: a reader task, a writer task, and the stream table.

use crate::end::End;
use crate::frame::{read_frame, write_frame, Frame};
use crate::listener::BoxedIo;
use crate::message::{InboundMessage, Message};
use crate::rpc::Request;
use crate::stream::{Stream, StreamState, INBOUND_QUEUE};
use crate::{Result, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// Which side of the handshake this session played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Dialer,
    Acceptor,
}

/// Connection-level events surfaced to the acceptor's delegate
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Heartbeat,
    Registered { stream_id: u64, method: String },
}

pub(crate) struct SessionConfig {
    pub role: Role,
    pub client_id: u64,
    pub meta: Bytes,
    pub remote_addr: String,
    pub network: String,
    pub max_frame_size: usize,
}

pub(crate) struct Session {
    pub(crate) client_id: u64,
    pub(crate) meta: Bytes,
    pub(crate) remote_addr: String,
    pub(crate) network: String,
    outbound: UnboundedSender<Frame>,
    streams: DashMap<u64, Arc<StreamState>>,
    pending_opens: DashMap<u64, oneshot::Sender<Option<String>>>,
    next_stream_id: AtomicU64,
    next_id: AtomicU64,
    accepted_tx: Mutex<Option<Sender<Arc<StreamState>>>>,
    accepted_rx: AsyncMutex<Receiver<Arc<StreamState>>>,
    closed: watch::Sender<bool>,
    shut: AtomicBool,
}

impl Session {
    /// Spawn the reader and writer tasks over a handshaken connection
    pub(crate) fn start(io: BoxedIo, config: SessionConfig) -> (End, UnboundedReceiver<SessionEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = mpsc::channel(INBOUND_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let first_stream_id = match config.role {
            Role::Dialer => 1,
            Role::Acceptor => 2,
        };

        let session = Arc::new(Session {
            client_id: config.client_id,
            meta: config.meta,
            remote_addr: config.remote_addr,
            network: config.network,
            outbound: outbound.clone(),
            streams: DashMap::new(),
            pending_opens: DashMap::new(),
            next_stream_id: AtomicU64::new(first_stream_id),
            next_id: AtomicU64::new(1),
            accepted_tx: Mutex::new(Some(accepted_tx)),
            accepted_rx: AsyncMutex::new(accepted_rx),
            closed,
            shut: AtomicBool::new(false),
        });

        let root = StreamState::new(
            0,
            String::new(),
            Bytes::new(),
            config.role == Role::Dialer,
            outbound,
        );
        session.streams.insert(0, root.clone());

        let (reader, writer) = tokio::io::split(io);
        tokio::spawn(write_loop(Arc::downgrade(&session), writer, outbound_rx));
        tokio::spawn(read_loop(
            session.clone(),
            reader,
            events_tx,
            config.max_frame_size,
        ));

        (End::new(Stream::new(session, root)), events_rx)
    }

    pub(crate) fn send(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }

    pub(crate) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn stream(&self, stream_id: u64) -> Option<Arc<StreamState>> {
        self.streams.get(&stream_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove_stream(&self, stream_id: u64) -> Option<Arc<StreamState>> {
        self.streams.remove(&stream_id).map(|(_, state)| state)
    }

    pub(crate) fn list_streams(&self) -> Vec<Arc<StreamState>> {
        self.streams
            .iter()
            .filter(|entry| *entry.key() != 0)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) async fn open_stream(self: &Arc<Self>, peer: String, meta: Bytes) -> Result<Stream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let stream_id = self.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let state = StreamState::new(stream_id, peer.clone(), meta.clone(), false, self.outbound.clone());
        self.streams.insert(stream_id, state.clone());

        let (tx, rx) = oneshot::channel();
        self.pending_opens.insert(stream_id, tx);
        if let Err(e) = self.send(Frame::Open {
            stream_id,
            peer,
            meta,
        }) {
            self.pending_opens.remove(&stream_id);
            self.remove_stream(stream_id);
            state.shutdown();
            return Err(e);
        }

        match rx.await {
            Ok(None) => Ok(Stream::new(self.clone(), state)),
            Ok(Some(err)) => {
                self.remove_stream(stream_id);
                state.shutdown();
                Err(TransportError::Remote(err))
            }
            Err(_) => {
                self.remove_stream(stream_id);
                state.shutdown();
                Err(TransportError::Closed)
            }
        }
    }

    pub(crate) async fn accept_stream(self: &Arc<Self>) -> Option<Stream> {
        let state = self.accepted_rx.lock().await.recv().await?;
        Some(Stream::new(self.clone(), state))
    }

    /// Tear the connection down locally; idempotent
    pub(crate) fn shutdown(&self) {
        if self.shut.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(client_id = self.client_id, addr = %self.remote_addr, "session closing");
        let _ = self.outbound.send(Frame::Goaway);
        self.closed.send_replace(true);

        let states: Vec<Arc<StreamState>> =
            self.streams.iter().map(|entry| entry.value().clone()).collect();
        self.streams.clear();
        for state in states {
            state.shutdown();
        }
        self.pending_opens.clear();
        *self.accepted_tx.lock() = None;
        if let Ok(mut rx) = self.accepted_rx.try_lock() {
            while let Ok(state) = rx.try_recv() {
                state.shutdown();
            }
        }
    }

    fn accept_open(&self, stream_id: u64, peer: String, meta: Bytes) {
        if self.streams.contains_key(&stream_id) {
            let _ = self.send(Frame::Opened {
                stream_id,
                error: Some(format!("stream {} already open", stream_id)),
            });
            return;
        }

        let state = StreamState::new(stream_id, peer, meta, false, self.outbound.clone());
        self.streams.insert(stream_id, state.clone());
        let refused = match self.accepted_tx.lock().as_ref() {
            Some(tx) => match tx.try_send(state.clone()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => Some("stream backlog full".to_string()),
                Err(TrySendError::Closed(_)) => Some(TransportError::Closed.to_string()),
            },
            None => Some(TransportError::Closed.to_string()),
        };
        if let Some(error) = refused {
            self.remove_stream(stream_id);
            state.shutdown();
            let _ = self.send(Frame::Opened {
                stream_id,
                error: Some(error),
            });
            return;
        }
        let _ = self.send(Frame::Opened {
            stream_id,
            error: None,
        });
    }

    /// Route one inbound frame; `false` ends the session. Waits while a
    /// publish or raw queue is full.
    async fn dispatch(&self, frame: Frame, events: &UnboundedSender<SessionEvent>) -> bool {
        match frame {
            Frame::Heartbeat => {
                let _ = events.send(SessionEvent::Heartbeat);
            }
            Frame::Register { stream_id, method } => {
                let _ = events.send(SessionEvent::Registered { stream_id, method });
            }
            Frame::Request {
                stream_id,
                request_id,
                method,
                data,
                custom,
            } => {
                let queued = match self.stream(stream_id) {
                    Some(state) => state.enqueue_request(request_id, Request { method, data, custom }),
                    None => Err(TransportError::Closed.to_string()),
                };
                if let Err(error) = queued {
                    let _ = self.send(Frame::Response {
                        stream_id,
                        request_id,
                        data: Bytes::new(),
                        custom: Bytes::new(),
                        error: Some(error),
                    });
                }
            }
            Frame::Response {
                stream_id,
                request_id,
                data,
                custom,
                error,
            } => {
                if let Some(state) = self.stream(stream_id) {
                    state.resolve_call(request_id, crate::rpc::Response { data, custom, error });
                }
            }
            Frame::Publish {
                stream_id,
                message_id,
                topic,
                data,
                custom,
                cnss,
            } => {
                let message = InboundMessage::new(
                    Message {
                        topic,
                        data,
                        custom,
                        cnss,
                    },
                    stream_id,
                    message_id,
                    self.outbound.clone(),
                );
                match self.stream(stream_id) {
                    Some(state) => {
                        if let Err(message) = state.deliver(message).await {
                            message.error(TransportError::Closed);
                        }
                    }
                    None => message.error(TransportError::Closed),
                }
            }
            Frame::Ack {
                stream_id,
                message_id,
                error,
            } => {
                if let Some(state) = self.stream(stream_id) {
                    state.resolve_ack(message_id, error);
                }
            }
            Frame::Open {
                stream_id,
                peer,
                meta,
            } => self.accept_open(stream_id, peer, meta),
            Frame::Opened { stream_id, error } => {
                if let Some((_, tx)) = self.pending_opens.remove(&stream_id) {
                    let _ = tx.send(error);
                }
            }
            Frame::Raw { stream_id, data } => {
                if let Some(state) = self.stream(stream_id) {
                    state.push_raw(data).await;
                }
            }
            Frame::Close { stream_id } => {
                if stream_id == 0 {
                    return false;
                }
                if let Some(state) = self.remove_stream(stream_id) {
                    state.shutdown();
                }
            }
            Frame::Goaway => return false,
            other @ (Frame::Hello { .. } | Frame::Welcome { .. } | Frame::Reject { .. }) => {
                warn!(
                    client_id = self.client_id,
                    frame = other.kind(),
                    "handshake frame after handshake"
                );
                return false;
            }
        }
        true
    }
}

async fn read_loop(
    session: Arc<Session>,
    mut reader: ReadHalf<BoxedIo>,
    events: UnboundedSender<SessionEvent>,
    max_frame_size: usize,
) {
    let mut closed = session.closed_watch();
    loop {
        let frame = tokio::select! {
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            frame = read_frame(&mut reader, max_frame_size) => frame,
        };
        match frame {
            Ok(Some(frame)) => {
                if !session.dispatch(frame, &events).await {
                    break;
                }
            }
            Ok(None) | Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(client_id = session.client_id, addr = %session.remote_addr, error = %e, "read failed");
                break;
            }
        }
    }
    session.shutdown();
}

async fn write_loop(
    session: Weak<Session>,
    mut writer: WriteHalf<BoxedIo>,
    mut frames: UnboundedReceiver<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        let last = matches!(frame, Frame::Goaway);
        if let Err(e) = write_frame(&mut writer, &frame).await {
            if !e.is_closed() {
                debug!(error = %e, "write failed");
            }
            if let Some(session) = session.upgrade() {
                session.shutdown();
            }
            break;
        }
        if last {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
