//! # Edgebound
//!
//! Terminates edge connections: assigns ids, keeps the live-edge map, writes
//! edge rows, and hands every online edge to the exchange.
//!
//! ## Id Resolution
//!
//! 1. an id the edge asked for at handshake
//! 2. the `get_edge_id` service, through the exchange
//! 3. a local monotonic id, when no id service is online and
//!    `edgeid_alloc_when_no_idservice_on` is set
//!
//! Any other id-service failure rejects the handshake.
//!
//! ## Life-cycle
//!
//! ```text
//! online:  admit (displace predecessor) → Edge row → informer → edge_online → forward
//! offline: retire (address-matched) → rows deleted → informer → edge_offline → release
//! ```
//!
//!
//! `edge_offline` goes out only for edges whose `edge_online` was accepted.

use crate::apis::{Edgebound, Exchange, Informer};
use crate::live::LiveEnds;
use async_trait::async_trait;
use network::{Acceptor, AcceptorOptions, BoundDelegate, End, Listener, Stream};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use repository::EdgeStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{now_millis, Edge, EdgeRpc, FrontierError, IdSource, Result};

#[derive(Debug, Clone)]
pub struct EdgeboundOptions {
    pub edgeid_alloc_when_no_idservice_on: bool,
    pub acceptor: AcceptorOptions,
}

impl Default for EdgeboundOptions {
    fn default() -> Self {
        Self {
            edgeid_alloc_when_no_idservice_on: true,
            acceptor: AcceptorOptions::default(),
        }
    }
}

pub struct EdgeManager {
    options: EdgeboundOptions,
    live: LiveEnds,
    store: Arc<dyn EdgeStore>,
    informer: Arc<dyn Informer>,
    ids: Arc<dyn IdSource>,
    exchange: OnceCell<Arc<dyn Exchange>>,
    /// Ends whose `edge_online` went through; only these get `edge_offline`
    announced: Mutex<HashSet<usize>>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    closed: AtomicBool,
}

impl EdgeManager {
    pub fn new(
        options: EdgeboundOptions,
        store: Arc<dyn EdgeStore>,
        informer: Arc<dyn Informer>,
        ids: Arc<dyn IdSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            live: LiveEnds::new("edge"),
            store,
            informer,
            ids,
            exchange: OnceCell::new(),
            announced: Mutex::new(HashSet::new()),
            acceptor: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Wire the exchange; later calls are ignored
    pub fn set_exchange(&self, exchange: Arc<dyn Exchange>) {
        if self.exchange.set(exchange).is_err() {
            warn!("edgebound exchange already set");
        }
    }

    /// Accept edges from `listener` until [`close`](Self::close)
    pub async fn serve(self: &Arc<Self>, listener: impl Listener) -> Result<()> {
        let acceptor = Arc::new(Acceptor::new(
            listener,
            self.clone(),
            self.options.acceptor.clone(),
        ));
        {
            let mut slot = self.acceptor.lock();
            if self.closed.load(Ordering::SeqCst) {
                acceptor.close();
            }
            *slot = Some(acceptor.clone());
        }
        info!(addr = %acceptor.local_addr(), "edgebound serving");

        while let Some(end) = acceptor.accept().await {
            debug!(edge_id = end.client_id(), addr = %end.remote_addr(), "edge online");
        }
        info!("edgebound closed");
        Ok(())
    }

    /// Stop accepting; live edges stay up
    pub fn close(&self) {
        let mut slot = self.acceptor.lock();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(acceptor) = slot.take() {
            acceptor.close();
        }
    }

    /// Close every live edge
    pub fn close_edges(&self) {
        self.live.close_all();
    }

    fn clear_rows(&self, end: &End) {
        let edge_id = end.client_id();
        if let Err(e) = self.store.delete_edge(edge_id, end.remote_addr()) {
            warn!(edge_id, error = %e, "delete edge row failed");
        }
        if let Err(e) = self.store.delete_edge_rpcs(edge_id) {
            warn!(edge_id, error = %e, "delete edge rpc rows failed");
        }
    }

    async fn resolve_edge_id(&self, meta: &[u8]) -> Result<u64> {
        if let Some(exchange) = self.exchange.get() {
            match exchange.get_edge_id(meta).await {
                Ok(edge_id) => return Ok(edge_id),
                Err(FrontierError::ServiceNotOnline) => {}
                Err(e) => {
                    warn!(error = %e, "get_edge_id failed");
                    return Err(e);
                }
            }
        }
        if self.options.edgeid_alloc_when_no_idservice_on {
            let edge_id = self.ids.next();
            debug!(edge_id, "edge id allocated locally");
            Ok(edge_id)
        } else {
            Err(FrontierError::ServiceNotOnline)
        }
    }
}

#[async_trait]
impl BoundDelegate for EdgeManager {
    async fn get_client_id(&self, meta: &[u8], wanted: Option<u64>) -> std::result::Result<u64, FrontierError> {
        match wanted {
            Some(edge_id) if edge_id > 0 => Ok(edge_id),
            _ => self.resolve_edge_id(meta).await,
        }
    }

    async fn connection_online(&self, end: &End) -> std::result::Result<(), FrontierError> {
        let edge_id = end.client_id();
        let admission = self.live.admit(end).await;
        if let Some(orphan) = &admission.orphan {
            self.clear_rows(orphan);
            self.informer.edge_offline(edge_id, orphan.remote_addr());
        }
        self.informer.set_edge_count(admission.count);

        let edge = Edge {
            edge_id,
            meta: String::from_utf8_lossy(end.meta()).into_owned(),
            addr: end.remote_addr().to_string(),
            create_time: now_millis(),
        };
        if let Err(e) = self.store.create_edge(edge) {
            error!(edge_id, error = %e, "create edge row failed");
            return Err(e.into());
        }

        self.informer.edge_online(edge_id, end.remote_addr());

        match self.exchange.get() {
            Some(exchange) => {
                match exchange.edge_online(end).await {
                    Ok(()) | Err(FrontierError::ServiceNotOnline) => {
                        self.announced.lock().insert(end.key());
                    }
                    Err(e) => {
                        warn!(edge_id, error = %e, "edge refused by edge_online");
                        return Err(e);
                    }
                }
                exchange.forward_to_service(end);
            }
            None => end.activate(),
        }

        info!(edge_id, addr = %end.remote_addr(), "edge online");
        Ok(())
    }

    async fn connection_offline(&self, end: &End) {
        let edge_id = end.client_id();
        let announced = self.announced.lock().remove(&end.key());
        if !self.live.retire(end) {
            debug!(edge_id, addr = %end.remote_addr(), "stale offline ignored");
            return;
        }
        self.informer.set_edge_count(self.live.len());
        self.clear_rows(end);

        self.informer.edge_offline(edge_id, end.remote_addr());
        match self.exchange.get() {
            Some(exchange) if announced => match exchange.edge_offline(end).await {
                Ok(()) | Err(FrontierError::ServiceNotOnline) => {}
                Err(e) => warn!(edge_id, error = %e, "edge_offline failed"),
            },
            Some(_) => debug!(edge_id, "edge never announced, edge_offline skipped"),
            None => {}
        }

        self.live.release(end);
        info!(edge_id, addr = %end.remote_addr(), "edge offline");
    }

    async fn heartbeat(&self, end: &End) {
        self.informer.edge_heartbeat(end.client_id(), end.remote_addr());
    }

    async fn remote_registration(&self, end: &End, _stream_id: u64, method: &str) {
        let row = EdgeRpc {
            edge_id: end.client_id(),
            rpc: method.to_string(),
            create_time: now_millis(),
        };
        if let Err(e) = self.store.create_edge_rpc(row) {
            warn!(edge_id = end.client_id(), rpc = method, error = %e, "create edge rpc row failed");
        }
    }
}

impl Edgebound for EdgeManager {
    fn get_edge_by_id(&self, edge_id: u64) -> Option<End> {
        self.live.get(edge_id)
    }

    fn list_edges(&self) -> Vec<End> {
        self.live.list()
    }

    fn count_edges(&self) -> usize {
        self.live.len()
    }

    fn list_streams(&self, edge_id: u64) -> Result<Vec<Stream>> {
        self.live
            .get(edge_id)
            .map(|end| end.list_streams())
            .ok_or(FrontierError::EdgeNotOnline)
    }

    fn del_edge_by_id(&self, edge_id: u64) -> Result<()> {
        let end = self.live.get(edge_id).ok_or(FrontierError::EdgeNotOnline)?;
        info!(edge_id, addr = %end.remote_addr(), "kicking edge");
        end.close();
        Ok(())
    }
}
