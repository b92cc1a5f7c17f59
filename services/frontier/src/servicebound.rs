//! # Servicebound
//!
//! Terminates service connections. A service declares `{service, topics}` as
//! handshake meta; its topics are claimed in the repository and the service
//! becomes an MQ sink for them before its end is handed to the exchange.
//!
//! Lookups resolve repository rows to live ends, so a row whose end is gone
//! is never returned.

use crate::apis::{Exchange, Informer, Servicebound};
use crate::live::LiveEnds;
use crate::mq::{MqManager, ServiceSink};
use async_trait::async_trait;
use network::{Acceptor, AcceptorOptions, BoundDelegate, End, Listener};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use repository::ServiceStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use types::{now_millis, FrontierError, IdSource, Result, Service, ServiceMeta, ServiceRpc, ServiceTopic};

pub struct ServiceManager {
    acceptor_options: AcceptorOptions,
    live: LiveEnds,
    store: Arc<dyn ServiceStore>,
    mqm: Arc<MqManager>,
    informer: Arc<dyn Informer>,
    ids: Arc<dyn IdSource>,
    exchange: OnceCell<Arc<dyn Exchange>>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    closed: AtomicBool,
}

impl ServiceManager {
    pub fn new(
        acceptor_options: AcceptorOptions,
        store: Arc<dyn ServiceStore>,
        mqm: Arc<MqManager>,
        informer: Arc<dyn Informer>,
        ids: Arc<dyn IdSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            acceptor_options,
            live: LiveEnds::new("service"),
            store,
            mqm,
            informer,
            ids,
            exchange: OnceCell::new(),
            acceptor: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_exchange(&self, exchange: Arc<dyn Exchange>) {
        if self.exchange.set(exchange).is_err() {
            warn!("servicebound exchange already set");
        }
    }

    pub async fn serve(self: &Arc<Self>, listener: impl Listener) -> Result<()> {
        let acceptor = Arc::new(Acceptor::new(
            listener,
            self.clone(),
            self.acceptor_options.clone(),
        ));
        {
            let mut slot = self.acceptor.lock();
            if self.closed.load(Ordering::SeqCst) {
                acceptor.close();
            }
            *slot = Some(acceptor.clone());
        }
        info!(addr = %acceptor.local_addr(), "servicebound serving");

        while let Some(end) = acceptor.accept().await {
            debug!(service_id = end.client_id(), addr = %end.remote_addr(), "service accepted");
        }
        info!("servicebound closed");
        Ok(())
    }

    pub fn close(&self) {
        let mut slot = self.acceptor.lock();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(acceptor) = slot.take() {
            acceptor.close();
        }
    }

    pub fn close_services(&self) {
        self.live.close_all();
    }

    fn clear_rows(&self, end: &End) {
        let service_id = end.client_id();
        if let Err(e) = self.store.delete_service(service_id, end.remote_addr()) {
            warn!(service_id, error = %e, "delete service row failed");
        }
        if let Err(e) = self.store.delete_service_rpcs(service_id) {
            warn!(service_id, error = %e, "delete service rpc rows failed");
        }
        if let Err(e) = self.store.delete_service_topics(service_id) {
            warn!(service_id, error = %e, "delete service topic rows failed");
        }
    }

    /// Live ends for the given rows, ordered by service id
    fn live_ends(&self, rows: Vec<Service>) -> Vec<End> {
        let mut ids: Vec<u64> = rows.into_iter().map(|row| row.service_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().filter_map(|id| self.live.get(id)).collect()
    }

    fn first_live(&self, rows: Vec<Service>, missing: FrontierError) -> Result<End> {
        self.live_ends(rows).into_iter().next().ok_or(missing)
    }
}

fn parse_meta(meta: &[u8]) -> Result<ServiceMeta> {
    let meta = ServiceMeta::from_bytes(meta)
        .map_err(|e| FrontierError::IllegalRequest(format!("service meta: {}", e)))?;
    if meta.service.is_empty() {
        return Err(FrontierError::IllegalRequest("service meta: empty service name".to_string()));
    }
    Ok(meta)
}

#[async_trait]
impl BoundDelegate for ServiceManager {
    async fn get_client_id(&self, meta: &[u8], wanted: Option<u64>) -> std::result::Result<u64, FrontierError> {
        parse_meta(meta)?;
        match wanted {
            Some(service_id) if service_id > 0 => Ok(service_id),
            _ => Ok(self.ids.next()),
        }
    }

    async fn connection_online(&self, end: &End) -> std::result::Result<(), FrontierError> {
        let service_id = end.client_id();
        let meta = parse_meta(end.meta())?;
        let admission = self.live.admit(end).await;
        if let Some(orphan) = &admission.orphan {
            self.clear_rows(orphan);
            self.informer.service_offline(service_id, orphan.remote_addr());
        }
        self.informer.set_service_count(admission.count);

        let now = now_millis();
        let row = Service {
            service_id,
            service: meta.service.clone(),
            addr: end.remote_addr().to_string(),
            create_time: now,
        };
        if let Err(e) = self.store.create_service(row) {
            error!(service_id, error = %e, "create service row failed");
            return Err(e.into());
        }
        for topic in &meta.topics {
            let row = ServiceTopic {
                service_id,
                topic: topic.clone(),
                create_time: now,
            };
            if let Err(e) = self.store.create_service_topic(row) {
                error!(service_id, topic = %topic, error = %e, "create service topic row failed");
                return Err(e.into());
            }
        }
        if !meta.topics.is_empty() {
            self.mqm
                .add_mq(&meta.topics, Arc::new(ServiceSink::new(end.clone(), meta.service.clone())));
        }

        self.informer.service_online(service_id, end.remote_addr());

        match self.exchange.get() {
            Some(exchange) => exchange.forward_to_edge(end),
            None => end.activate(),
        }

        info!(service_id, service = %meta.service, topics = ?meta.topics, addr = %end.remote_addr(), "service online");
        Ok(())
    }

    async fn connection_offline(&self, end: &End) {
        let service_id = end.client_id();
        self.mqm.del_mq(end.key());
        if !self.live.retire(end) {
            debug!(service_id, addr = %end.remote_addr(), "stale offline ignored");
            return;
        }
        self.informer.set_service_count(self.live.len());
        self.clear_rows(end);

        self.informer.service_offline(service_id, end.remote_addr());
        self.live.release(end);
        info!(service_id, addr = %end.remote_addr(), "service offline");
    }

    async fn heartbeat(&self, end: &End) {
        self.informer.service_heartbeat(end.client_id(), end.remote_addr());
    }

    async fn remote_registration(&self, end: &End, _stream_id: u64, method: &str) {
        let row = ServiceRpc {
            service_id: end.client_id(),
            rpc: method.to_string(),
            create_time: now_millis(),
        };
        if let Err(e) = self.store.create_service_rpc(row) {
            warn!(service_id = end.client_id(), rpc = method, error = %e, "create service rpc row failed");
        }
        debug!(service_id = end.client_id(), rpc = method, "service rpc registered");
    }
}

impl Servicebound for ServiceManager {
    fn get_service_by_id(&self, service_id: u64) -> Option<End> {
        self.live.get(service_id)
    }

    fn get_service_by_name(&self, name: &str) -> Result<End> {
        let rows = self.store.get_services_by_name(name)?;
        self.first_live(rows, FrontierError::ServiceNotOnline)
    }

    fn get_service_by_rpc(&self, rpc: &str) -> Result<End> {
        let rows = self.store.get_services_by_rpc(rpc)?;
        self.first_live(rows, FrontierError::RpcNotOnline)
    }

    fn get_service_by_topic(&self, topic: &str) -> Result<End> {
        let rows = self.store.get_services_by_topic(topic)?;
        self.first_live(rows, FrontierError::TopicNotOnline)
    }

    fn get_services_by_name(&self, name: &str) -> Result<Vec<End>> {
        let rows = self.store.get_services_by_name(name)?;
        Ok(self.live_ends(rows))
    }

    fn get_services_by_rpc(&self, rpc: &str) -> Result<Vec<End>> {
        let rows = self.store.get_services_by_rpc(rpc)?;
        Ok(self.live_ends(rows))
    }

    fn get_services_by_topic(&self, topic: &str) -> Result<Vec<End>> {
        let rows = self.store.get_services_by_topic(topic)?;
        Ok(self.live_ends(rows))
    }

    fn list_services(&self) -> Vec<End> {
        self.live.list()
    }

    fn count_services(&self) -> usize {
        self.live.len()
    }

    fn del_service_by_id(&self, service_id: u64) -> Result<()> {
        let end = self.live.get(service_id).ok_or(FrontierError::ServiceNotOnline)?;
        info!(service_id, addr = %end.remote_addr(), "kicking service");
        end.close();
        Ok(())
    }

    fn del_services_by_name(&self, _name: &str) -> Result<()> {
        Err(FrontierError::Unimplemented("DelServicesByName".to_string()))
    }
}
