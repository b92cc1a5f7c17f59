//! Accepting side: handshake, delegate life-cycle, accept loop.

use crate::delegate::BoundDelegate;
use crate::end::End;
use crate::frame::{read_frame, read_preface, write_frame, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::listener::{Accepted, Listener};
use crate::session::{Role, Session, SessionConfig, SessionEvent};
use crate::{Result, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AcceptorOptions {
    /// Bound on reading the preface and `Hello`
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for AcceptorOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Accepts connections from a listener and drives their life-cycle.
///
/// Each connection is handshaken and brought online on its own task; only
/// ends whose `connection_online` succeeded come out of [`accept`](Self::accept).
pub struct Acceptor {
    ends: AsyncMutex<UnboundedReceiver<End>>,
    shutdown: watch::Sender<bool>,
    local_addr: String,
}

impl Acceptor {
    pub fn new(
        listener: impl Listener,
        delegate: Arc<dyn BoundDelegate>,
        options: AcceptorOptions,
    ) -> Self {
        let (ends_tx, ends_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let local_addr = listener.local_addr();

        tokio::spawn(accept_loop(
            Box::new(listener),
            delegate,
            options,
            ends_tx,
            shutdown.subscribe(),
        ));

        Self {
            ends: AsyncMutex::new(ends_rx),
            shutdown,
            local_addr,
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Next online end; `None` once the acceptor is closed
    pub async fn accept(&self) -> Option<End> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return None;
        }
        let mut ends = self.ends.lock().await;
        tokio::select! {
            biased;
            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => None,
            end = ends.recv() => end,
        }
    }

    /// Stop accepting; live ends are left to their owner
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: Box<dyn Listener>,
    delegate: Arc<dyn BoundDelegate>,
    options: AcceptorOptions,
    ends: UnboundedSender<End>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(addr = %listener.local_addr(), "accepting connections");
    loop {
        let accepted = tokio::select! {
            _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(accepted) => {
                tokio::spawn(serve_connection(
                    accepted,
                    delegate.clone(),
                    options.clone(),
                    ends.clone(),
                ));
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    info!(addr = %listener.local_addr(), "listener closed");
}

async fn serve_connection(
    accepted: Accepted,
    delegate: Arc<dyn BoundDelegate>,
    options: AcceptorOptions,
    ends: UnboundedSender<End>,
) {
    let remote_addr = accepted.remote_addr.clone();
    let (end, mut events) = match handshake(accepted, delegate.as_ref(), &options).await {
        Ok(Some(started)) => started,
        Ok(None) => return,
        Err(e) => {
            if !e.is_closed() {
                debug!(addr = %remote_addr, error = %e, "handshake failed");
            }
            return;
        }
    };

    match delegate.connection_online(&end).await {
        Ok(()) => {
            let _ = ends.send(end.clone());
        }
        Err(e) => {
            warn!(client_id = end.client_id(), addr = %remote_addr, error = %e, "online failed, closing");
            end.close();
        }
    }

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Heartbeat => delegate.heartbeat(&end).await,
            SessionEvent::Registered { stream_id, method } => {
                delegate.remote_registration(&end, stream_id, &method).await
            }
        }
    }

    delegate.connection_offline(&end).await;
}

async fn handshake(
    mut accepted: Accepted,
    delegate: &dyn BoundDelegate,
    options: &AcceptorOptions,
) -> Result<Option<(End, UnboundedReceiver<SessionEvent>)>> {
    let timeout_ms = options.handshake_timeout.as_millis() as u64;
    let hello = tokio::time::timeout(options.handshake_timeout, async {
        read_preface(&mut accepted.io).await?;
        read_frame(&mut accepted.io, options.max_frame_size).await
    })
    .await
    .map_err(|_| TransportError::timeout("handshake", timeout_ms))??;

    let (meta, wanted) = match hello {
        Some(Frame::Hello { meta, client_id }) => (meta, client_id),
        Some(other) => {
            return Err(TransportError::protocol(format!(
                "expected hello, got {}",
                other.kind()
            )))
        }
        None => return Err(TransportError::Closed),
    };

    let client_id = match delegate.get_client_id(&meta, wanted).await {
        Ok(client_id) => client_id,
        Err(e) => {
            info!(addr = %accepted.remote_addr, error = %e, "handshake rejected");
            let reject = Frame::Reject {
                reason: e.to_wire(),
            };
            let _ = write_frame(&mut accepted.io, &reject).await;
            return Ok(None);
        }
    };

    write_frame(&mut accepted.io, &Frame::Welcome { client_id }).await?;

    let started = Session::start(
        accepted.io,
        SessionConfig {
            role: Role::Acceptor,
            client_id,
            meta,
            remote_addr: accepted.remote_addr,
            network: accepted.network,
            max_frame_size: options.max_frame_size,
        },
    );
    Ok(Some(started))
}
