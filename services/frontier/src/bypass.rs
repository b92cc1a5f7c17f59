//! Edge port sharing.
//!
//! [`BypassListener`] sniffs the first two bytes of every TCP connection.
//! Gateway traffic (the transport preface) is handed to edgebound; anything
//! else is proxied byte-for-byte to the bypass address.

use async_trait::async_trait;
use network::{Accepted, Listener, TransportError, PREFACE};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);
const PENDING_ACCEPTS: usize = 128;
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

pub struct BypassListener {
    accepted: AsyncMutex<Receiver<Accepted>>,
    local_addr: String,
    task: JoinHandle<()>,
}

impl BypassListener {
    pub async fn bind(addr: &str, bypass_addr: impl Into<String>) -> network::Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::network(format!("bind {}: {}", addr, e)))?;
        let local_addr = inner
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| addr.to_string());
        let bypass_addr = bypass_addr.into();
        info!(addr = %local_addr, bypass = %bypass_addr, "edge port bypass enabled");

        let (tx, rx) = mpsc::channel(PENDING_ACCEPTS);
        let task = tokio::spawn(accept_loop(inner, bypass_addr, tx));
        Ok(Self {
            accepted: AsyncMutex::new(rx),
            local_addr,
            task,
        })
    }
}

impl Drop for BypassListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Listener for BypassListener {
    async fn accept(&self) -> network::Result<Accepted> {
        self.accepted.lock().await.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> String {
        self.local_addr.clone()
    }
}

async fn accept_loop(listener: TcpListener, bypass_addr: String, gateway: Sender<Accepted>) {
    let mut backoff = ACCEPT_BACKOFF_START;
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, retry_in_ms = backoff.as_millis() as u64, "edge accept failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = gateway.closed() => break,
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    continue;
                }
            },
            _ = gateway.closed() => break,
        };
        backoff = ACCEPT_BACKOFF_START;
        let _ = stream.set_nodelay(true);
        tokio::spawn(sniff(stream, peer.to_string(), bypass_addr.clone(), gateway.clone()));
    }
    debug!("edge bypass accept loop stopped");
}

async fn sniff(stream: TcpStream, peer: String, bypass_addr: String, handoff: Sender<Accepted>) {
    match tokio::time::timeout(SNIFF_TIMEOUT, is_gateway(&stream)).await {
        Ok(Ok(true)) => {
            let accepted = Accepted {
                io: Box::new(stream),
                remote_addr: peer,
                network: "tcp".to_string(),
            };
            let _ = handoff.send(accepted).await;
        }
        Ok(Ok(false)) => proxy(stream, &peer, &bypass_addr).await,
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "sniff failed"),
        Err(_) => debug!(peer = %peer, "sniff timed out"),
    }
}

/// Peek until two bytes are buffered and compare them with the preface
async fn is_gateway(stream: &TcpStream) -> std::io::Result<bool> {
    let mut head = [0u8; 2];
    loop {
        let n = stream.peek(&mut head).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        if n >= PREFACE.len() {
            return Ok(head == PREFACE);
        }
        if head[0] != PREFACE[0] {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn proxy(mut inbound: TcpStream, peer: &str, bypass_addr: &str) {
    let mut outbound = match TcpStream::connect(bypass_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer, bypass = bypass_addr, error = %e, "bypass connect failed");
            return;
        }
    };
    match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
        Ok((up, down)) => debug!(peer, up, down, "bypass connection finished"),
        Err(e) => debug!(peer, error = %e, "bypass connection ended"),
    }
}
