//! # Frontier Plane
//!
//! Frontiers dial Frontlas over the multiplexed transport with a JSON
//! [`FrontierMeta`]. The connection itself is the frontier's registration:
//!
//! - online writes the frontier row and its alive key
//! - transport heartbeats refresh both, re-creating them if they lapsed
//! - offline deletes the row, unless a newer connection took the id over
//!
//! Life-cycle reports arrive as RPCs on the root stream and are served by
//! one catch-all handler per connection.

use crate::error::FrontlasError;
use crate::keys::Role;
use crate::store::ClusterStore;
use async_trait::async_trait;
use dashmap::DashMap;
use network::{Acceptor, AcceptorOptions, BoundDelegate, End, Listener, Request, RequestHandler, Response};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{
    now_millis, EdgeReport, FrontierError, FrontierMeta, FrontierStats, IdSource, MonotonicIdSource,
    Residency, Result, ServiceReport, RPC_EDGE_HEARTBEAT, RPC_EDGE_OFFLINE, RPC_EDGE_ONLINE,
    RPC_FRONTIER_STATS, RPC_SERVICE_HEARTBEAT, RPC_SERVICE_OFFLINE, RPC_SERVICE_ONLINE,
};

fn parse_meta(meta: &[u8]) -> Result<FrontierMeta> {
    let meta: FrontierMeta = serde_json::from_slice(meta)
        .map_err(|e| FrontierError::IllegalRequest(format!("frontier meta: {}", e)))?;
    if meta.frontier_id.is_empty() {
        return Err(FrontierError::IllegalRequest("frontier meta: empty frontier id".to_string()));
    }
    Ok(meta)
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| FrontierError::IllegalRequest(e.to_string()))
}

pub struct FrontierPlane {
    store: Arc<dyn ClusterStore>,
    ids: MonotonicIdSource,
    live: DashMap<String, End>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    closed: AtomicBool,
}

impl FrontierPlane {
    pub fn new(store: Arc<dyn ClusterStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            ids: MonotonicIdSource::new(),
            live: DashMap::new(),
            acceptor: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Accept frontiers until [`close`](Self::close)
    pub async fn serve(self: &Arc<Self>, listener: impl Listener) {
        let acceptor = Arc::new(Acceptor::new(listener, self.clone(), AcceptorOptions::default()));
        {
            let mut slot = self.acceptor.lock();
            if self.closed.load(Ordering::SeqCst) {
                acceptor.close();
            }
            *slot = Some(acceptor.clone());
        }
        info!(addr = %acceptor.local_addr(), "frontier plane serving");

        while let Some(end) = acceptor.accept().await {
            debug!(addr = %end.remote_addr(), "frontier accepted");
        }
        info!("frontier plane closed");
    }

    pub fn close(&self) {
        let mut slot = self.acceptor.lock();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(acceptor) = slot.take() {
            acceptor.close();
        }
    }

    /// Disconnect every frontier
    pub fn close_frontiers(&self) {
        for entry in self.live.iter() {
            entry.value().close();
        }
    }

    /// Ids of the frontiers connected to this instance
    pub fn frontier_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl BoundDelegate for FrontierPlane {
    async fn get_client_id(&self, meta: &[u8], wanted: Option<u64>) -> Result<u64> {
        parse_meta(meta)?;
        match wanted {
            Some(id) if id > 0 => Ok(id),
            _ => Ok(self.ids.next()),
        }
    }

    async fn connection_online(&self, end: &End) -> Result<()> {
        let meta = parse_meta(end.meta())?;
        let created = self.store.create_frontier(&meta).await.map_err(|e| {
            error!(frontier_id = %meta.frontier_id, error = %e, "create frontier failed");
            FrontierError::from(e)
        })?;

        end.hijack(ReportHandler {
            store: self.store.clone(),
            frontier_id: meta.frontier_id.clone(),
        })?;

        if let Some(previous) = self.live.insert(meta.frontier_id.clone(), end.clone()) {
            warn!(frontier_id = %meta.frontier_id, previous = %previous.remote_addr(), "frontier reconnected, closing previous connection");
            previous.close();
        }
        info!(
            frontier_id = %meta.frontier_id,
            addr = %end.remote_addr(),
            created,
            "frontier online"
        );
        Ok(())
    }

    async fn connection_offline(&self, end: &End) {
        let Ok(meta) = parse_meta(end.meta()) else {
            return;
        };
        let owned = self
            .live
            .remove_if(&meta.frontier_id, |_, live| live.same(end))
            .is_some();
        if !owned {
            debug!(frontier_id = %meta.frontier_id, "stale frontier offline ignored");
            return;
        }
        if let Err(e) = self.store.delete_frontier(&meta.frontier_id).await {
            warn!(frontier_id = %meta.frontier_id, error = %e, "delete frontier failed");
        }
        info!(frontier_id = %meta.frontier_id, addr = %end.remote_addr(), "frontier offline");
    }

    async fn heartbeat(&self, end: &End) {
        let Ok(meta) = parse_meta(end.meta()) else {
            return;
        };
        match self.store.refresh_frontier(&meta.frontier_id).await {
            Ok(()) => {}
            Err(FrontlasError::ExpireFailed) => {
                debug!(frontier_id = %meta.frontier_id, "frontier lapsed, re-creating");
                if let Err(e) = self.store.create_frontier(&meta).await {
                    warn!(frontier_id = %meta.frontier_id, error = %e, "re-create frontier failed");
                }
            }
            Err(e) => warn!(frontier_id = %meta.frontier_id, error = %e, "refresh frontier failed"),
        }
    }
}

/// Serves the life-cycle reports of one frontier
struct ReportHandler {
    store: Arc<dyn ClusterStore>,
    frontier_id: String,
}

impl ReportHandler {
    fn residency(&self, addr: String) -> Residency {
        Residency {
            frontier_id: self.frontier_id.clone(),
            addr,
            update_time: now_millis(),
        }
    }

    async fn online(&self, role: Role, id: u64, addr: String) -> Result<()> {
        self.store.set_resident(role, id, &self.residency(addr)).await?;
        debug!(frontier_id = %self.frontier_id, ?role, id, "resident online");
        Ok(())
    }

    async fn offline(&self, role: Role, id: u64) -> Result<()> {
        let removed = self
            .store
            .delete_resident(role, id, Some(&self.frontier_id))
            .await?;
        debug!(frontier_id = %self.frontier_id, ?role, id, removed, "resident offline");
        Ok(())
    }

    async fn heartbeat(&self, role: Role, id: u64, addr: String) -> Result<()> {
        match self.store.refresh_resident(role, id).await {
            Err(FrontlasError::ExpireFailed) => self.online(role, id, addr).await,
            other => Ok(other?),
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<()> {
        let data = &request.data[..];
        match request.method.as_str() {
            RPC_EDGE_ONLINE => {
                let report: EdgeReport = decode(data)?;
                self.online(Role::Edge, report.edge_id, report.addr).await
            }
            RPC_EDGE_OFFLINE => {
                let report: EdgeReport = decode(data)?;
                self.offline(Role::Edge, report.edge_id).await
            }
            RPC_EDGE_HEARTBEAT => {
                let report: EdgeReport = decode(data)?;
                self.heartbeat(Role::Edge, report.edge_id, report.addr).await
            }
            RPC_SERVICE_ONLINE => {
                let report: ServiceReport = decode(data)?;
                self.online(Role::Service, report.service_id, report.addr).await
            }
            RPC_SERVICE_OFFLINE => {
                let report: ServiceReport = decode(data)?;
                self.offline(Role::Service, report.service_id).await
            }
            RPC_SERVICE_HEARTBEAT => {
                let report: ServiceReport = decode(data)?;
                self.heartbeat(Role::Service, report.service_id, report.addr).await
            }
            RPC_FRONTIER_STATS => {
                let stats: FrontierStats = decode(data)?;
                Ok(self.store.set_frontier_stats(&self.frontier_id, stats).await?)
            }
            other => Err(FrontierError::Unimplemented(other.to_string())),
        }
    }
}

#[async_trait]
impl RequestHandler for ReportHandler {
    async fn handle(&self, request: Request) -> Response {
        match self.dispatch(&request).await {
            Ok(()) => Response::default(),
            Err(e) => {
                warn!(frontier_id = %self.frontier_id, method = %request.method, error = %e, "report failed");
                Response::error(e.to_wire())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        let meta = br#"{"frontier_id":"f1","advertised_sb_addr":"a:1","advertised_eb_addr":"a:2"}"#;
        assert_eq!(parse_meta(meta).unwrap().frontier_id, "f1");
        assert!(matches!(
            parse_meta(br#"{"frontier_id":"","advertised_sb_addr":"","advertised_eb_addr":""}"#),
            Err(FrontierError::IllegalRequest(_))
        ));
        assert!(parse_meta(b"not json").is_err());
    }
}
