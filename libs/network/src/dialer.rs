//! Dialing side: handshake and heartbeats.

use crate::end::End;
use crate::frame::{read_frame, write_frame, write_preface, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::listener::{BoxedIo, Connector};
use crate::session::{Role, Session, SessionConfig};
use crate::{Result, TransportError};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Meta handed to the acceptor's delegate
    pub meta: Bytes,
    /// Id to ask for; the acceptor decides
    pub client_id: Option<u64>,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            meta: Bytes::new(),
            client_id: None,
            heartbeat_interval: Duration::from_secs(20),
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl DialOptions {
    pub fn with_meta(mut self, meta: impl Into<Bytes>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn with_client_id(mut self, client_id: u64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Connect to `addr` through `connector` and handshake
pub async fn dial(connector: &dyn Connector, addr: &str, options: DialOptions) -> Result<End> {
    let (io, network) = connector.connect(addr).await?;
    dial_io(io, addr.to_string(), network, options).await
}

/// Handshake over an already connected byte stream
pub async fn dial_io(
    mut io: BoxedIo,
    remote_addr: String,
    network: String,
    options: DialOptions,
) -> Result<End> {
    let timeout_ms = options.handshake_timeout.as_millis() as u64;
    let hello = Frame::Hello {
        meta: options.meta.clone(),
        client_id: options.client_id,
    };

    let reply = tokio::time::timeout(options.handshake_timeout, async {
        write_preface(&mut io).await?;
        write_frame(&mut io, &hello).await?;
        read_frame(&mut io, options.max_frame_size).await
    })
    .await
    .map_err(|_| TransportError::timeout("handshake", timeout_ms))??;

    let client_id = match reply {
        Some(Frame::Welcome { client_id }) => client_id,
        Some(Frame::Reject { reason }) => return Err(TransportError::Rejected(reason)),
        Some(other) => {
            return Err(TransportError::protocol(format!(
                "expected welcome, got {}",
                other.kind()
            )))
        }
        None => return Err(TransportError::Closed),
    };
    debug!(client_id, addr = %remote_addr, "dialed");

    let (end, _events) = Session::start(
        io,
        SessionConfig {
            role: Role::Dialer,
            client_id,
            meta: options.meta,
            remote_addr,
            network,
            max_frame_size: options.max_frame_size,
        },
    );

    if !options.heartbeat_interval.is_zero() {
        tokio::spawn(heartbeat_loop(end.clone(), options.heartbeat_interval));
    }
    Ok(end)
}

async fn heartbeat_loop(end: End, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = end.closed() => break,
            _ = ticker.tick() => {
                if end.stream().session.send(Frame::Heartbeat).is_err() {
                    break;
                }
            }
        }
    }
}
