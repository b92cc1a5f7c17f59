//! Listeners and connectors.
//!
//! A [`Listener`] yields raw byte streams for an [`Acceptor`](crate::Acceptor);
//! a [`Connector`] produces them for [`dial`](crate::dial). TCP is the
//! production pair. [`MemoryNetwork`] is an in-process pair built on
//! `tokio::io::duplex`, addressed by name, which gives every connection a
//! synthetic remote address `mem:{n}`.

use crate::{Result, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Any bidirectional byte stream a session can run over
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// A connection produced by a listener, before any handshake
pub struct Accepted {
    pub io: BoxedIo,
    pub remote_addr: String,
    pub network: String,
}

#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Next inbound connection; [`TransportError::Closed`] when the listener is gone
    async fn accept(&self) -> Result<Accepted>;

    fn local_addr(&self) -> String;
}

#[async_trait]
impl Listener for Box<dyn Listener> {
    async fn accept(&self) -> Result<Accepted> {
        (**self).accept().await
    }

    fn local_addr(&self) -> String {
        (**self).local_addr()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `addr`, returning the stream and the network name
    async fn connect(&self, addr: &str) -> Result<(BoxedIo, String)>;
}

/// TCP listener
pub struct TcpListener {
    inner: TokioTcpListener,
    local_addr: String,
}

impl TcpListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let inner = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::network(format!("bind {}: {}", addr, e)))?;
        let local_addr = inner
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        Ok(Self { inner, local_addr })
    }

    pub fn from_tokio(inner: TokioTcpListener) -> Self {
        let local_addr = inner
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Self { inner, local_addr }
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> Result<Accepted> {
        let (stream, peer) = self.inner.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok(Accepted {
            io: Box::new(stream),
            remote_addr: peer.to_string(),
            network: "tcp".to_string(),
        })
    }

    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }
}

/// TCP connector
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<(BoxedIo, String)> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::network(format!("connect {}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);
        Ok((Box::new(stream), "tcp".to_string()))
    }
}

const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

type Incoming = (DuplexStream, String);

struct MemoryInner {
    listeners: DashMap<String, UnboundedSender<Incoming>>,
    next_conn: AtomicU64,
}

/// In-process network of named listeners
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                listeners: DashMap::new(),
                next_conn: AtomicU64::new(1),
            }),
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen under `name`; fails when the name is taken
    pub fn listen(&self, name: &str) -> Result<MemoryListener> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.listeners.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::network(format!("address in use: {}", name)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        Ok(MemoryListener {
            name: name.to_string(),
            incoming: AsyncMutex::new(rx),
            network: self.clone(),
        })
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn connect(&self, addr: &str) -> Result<(BoxedIo, String)> {
        let listener = self
            .inner
            .listeners
            .get(addr)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::network(format!("connection refused: {}", addr)))?;

        let (client, server) = tokio::io::duplex(MEMORY_PIPE_CAPACITY);
        let n = self.inner.next_conn.fetch_add(1, Ordering::Relaxed);
        listener
            .send((server, format!("mem:{}", n)))
            .map_err(|_| TransportError::network(format!("connection refused: {}", addr)))?;
        Ok((Box::new(client), "mem".to_string()))
    }
}

/// Listener side of a [`MemoryNetwork`] name
pub struct MemoryListener {
    name: String,
    incoming: AsyncMutex<UnboundedReceiver<Incoming>>,
    network: MemoryNetwork,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Accepted> {
        let (io, remote_addr) = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)?;
        debug!(listener = %self.name, remote_addr = %remote_addr, "memory connection");
        Ok(Accepted {
            io: Box::new(io),
            remote_addr,
            network: "mem".to_string(),
        })
    }

    fn local_addr(&self) -> String {
        self.name.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.network.inner.listeners.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_connections_get_distinct_addresses() {
        let net = MemoryNetwork::new();
        let listener = net.listen("frontier").unwrap();

        let (mut a, _) = net.connect("frontier").await.unwrap();
        let (_b, _) = net.connect("frontier").await.unwrap();

        let mut first = listener.accept().await.unwrap();
        let second = listener.accept().await.unwrap();
        assert_ne!(first.remote_addr, second.remote_addr);
        assert!(first.remote_addr.starts_with("mem:"));

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        first.io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_name_is_released_on_drop() {
        let net = MemoryNetwork::new();
        let listener = net.listen("x").unwrap();
        assert!(net.listen("x").is_err());
        drop(listener);
        assert!(net.listen("x").is_ok());
        assert!(net.connect("nowhere").await.is_err());
    }
}
