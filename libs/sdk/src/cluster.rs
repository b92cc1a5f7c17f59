//! # Cluster Service
//!
//! One service identity spread over every gateway of a cluster. The client
//! keeps a connection to each frontier the locator lists and routes each
//! edge-addressed operation to the frontier currently holding that edge.
//!
//! ## State
//!
//! - `ends`: frontier id → (frontier record, service connection)
//! - `edges`: edge id ⇌ frontier id, filled lazily from
//!   [`FrontierLocator::get_frontier_by_edge`]
//!
//! A reconciliation pass runs every 10 seconds (and once at start): new
//! frontiers are dialed, vanished or re-addressed ones are closed. Messages
//! and streams from every connection are fanned into two bounded channels.
//!
//! ## Error Policy
//!
//! A failed call, publish, or stream open drops every edge row pointing at
//! the frontier involved, so the next attempt asks the locator again. When
//! the failure is the connection itself, that frontier's end is closed too.

use crate::locator::FrontierLocator;
use crate::service::{ServiceClient, ServiceHandler, ServiceMessage, ServiceOptions};
use async_trait::async_trait;
use dashmap::DashMap;
use network::{Connector, Message, Request, Response, Stream};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use types::{BiMap, Frontier, FrontierError, Result};

const UPDATE_INTERVAL: Duration = Duration::from_secs(10);
const FAN_IN_CAPACITY: usize = 128;

/// Connects this service to one frontier
#[async_trait]
pub trait FrontierDialer: Send + Sync + 'static {
    async fn dial(&self, frontier: &Frontier) -> Result<ServiceClient>;
}

/// Dials `advertised_sb_addr` with fixed service options
pub struct ConnectorDialer {
    connector: Arc<dyn Connector>,
    options: ServiceOptions,
}

impl ConnectorDialer {
    pub fn new(connector: Arc<dyn Connector>, options: ServiceOptions) -> Self {
        Self { connector, options }
    }
}

#[async_trait]
impl FrontierDialer for ConnectorDialer {
    async fn dial(&self, frontier: &Frontier) -> Result<ServiceClient> {
        ServiceClient::dial(
            self.connector.as_ref(),
            &frontier.advertised_sb_addr,
            &self.options,
        )
        .await
    }
}

struct FrontierEnd {
    frontier: Frontier,
    client: ServiceClient,
}

struct Inner {
    locator: Arc<dyn FrontierLocator>,
    dialer: Arc<dyn FrontierDialer>,
    ends: DashMap<String, FrontierEnd>,
    edges: BiMap<u64, String>,
    updating: AsyncMutex<()>,
    handlers: Mutex<HashMap<String, Arc<dyn ServiceHandler>>>,
    message_tx: mpsc::Sender<ServiceMessage>,
    stream_tx: mpsc::Sender<Stream>,
    closed: watch::Sender<bool>,
}

/// Service client spanning every frontier of a cluster
pub struct ClusterService {
    inner: Arc<Inner>,
    message_rx: AsyncMutex<mpsc::Receiver<ServiceMessage>>,
    stream_rx: AsyncMutex<mpsc::Receiver<Stream>>,
}

impl ClusterService {
    /// Start the client and its reconciliation loop
    pub fn new(locator: Arc<dyn FrontierLocator>, dialer: Arc<dyn FrontierDialer>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(FAN_IN_CAPACITY);
        let (stream_tx, stream_rx) = mpsc::channel(FAN_IN_CAPACITY);
        let (closed, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            locator,
            dialer,
            ends: DashMap::new(),
            edges: BiMap::new(),
            updating: AsyncMutex::new(()),
            handlers: Mutex::new(HashMap::new()),
            message_tx,
            stream_tx,
            closed,
        });

        tokio::spawn(update_loop(inner.clone()));
        Self {
            inner,
            message_rx: AsyncMutex::new(message_rx),
            stream_rx: AsyncMutex::new(stream_rx),
        }
    }

    /// Reconcile connections with the locator now
    pub async fn update(&self) -> Result<()> {
        self.inner.update().await
    }

    /// Frontier ids with a live connection
    pub fn frontiers(&self) -> Vec<String> {
        self.inner.ends.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn call(&self, edge_id: u64, request: Request) -> Result<Response> {
        let (frontier_id, client) = self.inner.lookup(edge_id).await?;
        let result = client.call(edge_id, request).await;
        self.inner.observe(&frontier_id, &client, result)
    }

    pub async fn publish(&self, edge_id: u64, message: Message) -> Result<()> {
        let (frontier_id, client) = self.inner.lookup(edge_id).await?;
        let result = client.publish(edge_id, message).await;
        self.inner.observe(&frontier_id, &client, result)
    }

    pub async fn open_stream(&self, edge_id: u64) -> Result<Stream> {
        let (frontier_id, client) = self.inner.lookup(edge_id).await?;
        let result = client.open_stream(edge_id).await;
        self.inner.observe(&frontier_id, &client, result)
    }

    /// Serve `method` on every current and future frontier connection
    pub fn register(&self, method: impl Into<String>, handler: impl ServiceHandler) -> Result<()> {
        let method = method.into();
        let handler: Arc<dyn ServiceHandler> = Arc::new(handler);
        let mut handlers = self.inner.handlers.lock();
        for end in self.inner.ends.iter() {
            end.client.register_shared(method.clone(), handler.clone())?;
        }
        handlers.insert(method, handler);
        Ok(())
    }

    /// Next message from any frontier
    pub async fn receive(&self) -> Option<ServiceMessage> {
        self.message_rx.lock().await.recv().await
    }

    /// Next stream an edge opened on any frontier
    pub async fn accept_stream(&self) -> Option<Stream> {
        self.stream_rx.lock().await.recv().await
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for ClusterService {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    async fn update(self: &Arc<Self>) -> Result<()> {
        let _updating = self.updating.lock().await;
        let frontiers = self.locator.list_frontiers().await?;

        let mut listed = HashSet::with_capacity(frontiers.len());
        for frontier in frontiers {
            listed.insert(frontier.frontier_id.clone());
            let stale = match self.ends.get(&frontier.frontier_id) {
                Some(end) if end.frontier.same_instance(&frontier) => continue,
                Some(_) => true,
                None => false,
            };
            if stale {
                info!(frontier_id = %frontier.frontier_id, "frontier re-addressed");
                self.drop_frontier(&frontier.frontier_id, true);
            }
            if let Err(e) = self.connect(frontier.clone()).await {
                warn!(frontier_id = %frontier.frontier_id, error = %e, "dial frontier failed");
            }
        }

        let gone: Vec<String> = self
            .ends
            .iter()
            .filter(|end| !listed.contains(end.key()))
            .map(|end| end.key().clone())
            .collect();
        for frontier_id in gone {
            info!(frontier_id = %frontier_id, "frontier gone");
            self.drop_frontier(&frontier_id, true);
        }
        Ok(())
    }

    /// Dial `frontier`, replay registrations, and start its fan-in tasks
    async fn connect(self: &Arc<Self>, frontier: Frontier) -> Result<ServiceClient> {
        let client = self.dialer.dial(&frontier).await?;
        let frontier_id = frontier.frontier_id.clone();
        {
            let handlers = self.handlers.lock();
            for (method, handler) in handlers.iter() {
                client.register_shared(method.clone(), handler.clone())?;
            }
            self.ends.insert(
                frontier_id.clone(),
                FrontierEnd {
                    frontier,
                    client: client.clone(),
                },
            );
        }
        debug!(frontier_id = %frontier_id, "frontier connected");

        tokio::spawn(fan_in_messages(client.clone(), self.message_tx.clone()));
        tokio::spawn(fan_in_streams(client.clone(), self.stream_tx.clone()));
        tokio::spawn(forget_on_close(Arc::downgrade(self), frontier_id, client.clone()));
        Ok(client)
    }

    async fn lookup(self: &Arc<Self>, edge_id: u64) -> Result<(String, ServiceClient)> {
        if let Some(frontier_id) = self.edges.get_by_left(&edge_id) {
            if let Some(end) = self.ends.get(&frontier_id) {
                return Ok((frontier_id, end.client.clone()));
            }
        }

        let frontier = self
            .locator
            .get_frontier_by_edge(edge_id)
            .await?
            .ok_or(FrontierError::EdgeNotOnline)?;
        let frontier_id = frontier.frontier_id.clone();

        let client = {
            let _updating = self.updating.lock().await;
            let existing = self.ends.get(&frontier_id).map(|end| end.client.clone());
            match existing {
                Some(client) => client,
                None => self.connect(frontier).await?,
            }
        };
        self.edges.insert(edge_id, frontier_id.clone());
        Ok((frontier_id, client))
    }

    fn observe<T>(&self, frontier_id: &str, client: &ServiceClient, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let broken = client.is_closed() || matches!(err, FrontierError::Transport(_));
            debug!(frontier_id, error = %err, broken, "dropping edge rows");
            self.drop_frontier(frontier_id, broken);
        }
        result
    }

    fn drop_frontier(&self, frontier_id: &str, close: bool) {
        self.edges.remove_right(&frontier_id.to_string());
        if close {
            if let Some((_, end)) = self.ends.remove(frontier_id) {
                end.client.close();
            }
        }
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let ids: Vec<String> = self.ends.iter().map(|e| e.key().clone()).collect();
        for frontier_id in ids {
            self.drop_frontier(&frontier_id, true);
        }
    }
}

async fn update_loop(inner: Arc<Inner>) {
    let mut closed = inner.closed.subscribe();
    let mut ticker = tokio::time::interval(UPDATE_INTERVAL);
    loop {
        tokio::select! {
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.update().await {
                    warn!(error = %e, "frontier update failed");
                }
            }
        }
    }
}

async fn fan_in_messages(client: ServiceClient, tx: mpsc::Sender<ServiceMessage>) {
    while let Some(message) = client.receive().await {
        if tx.send(message).await.is_err() {
            break;
        }
    }
}

async fn fan_in_streams(client: ServiceClient, tx: mpsc::Sender<Stream>) {
    while let Some(stream) = client.accept_stream().await {
        if tx.send(stream).await.is_err() {
            break;
        }
    }
}

/// Forget a frontier whose connection dropped on its own
async fn forget_on_close(inner: std::sync::Weak<Inner>, frontier_id: String, client: ServiceClient) {
    client.closed().await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let current = inner
        .ends
        .get(&frontier_id)
        .map(|end| end.client.end().same(client.end()))
        .unwrap_or(false);
    if current {
        debug!(frontier_id = %frontier_id, "frontier connection closed");
        inner.drop_frontier(&frontier_id, true);
    }
}
