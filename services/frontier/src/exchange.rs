//! # Exchange
//!
//! Routing core between edgebound and servicebound. Owns no entities; every
//! lookup goes through the bounds or the MQ manager.
//!
//! ## Paths
//!
//! ```text
//! edge publish   ──▶ mqm.produce ──▶ service (custom ‖ edge_id)
//! edge call      ──▶ services by rpc, hash-selected ──▶ service (custom ‖ edge_id)
//! service publish (custom ‖ edge_id) ──▶ edge (custom)
//! service call    (custom ‖ edge_id) ──▶ edge (custom), response re-tagged
//! edge stream    (peer = service name) ⇄ service stream (peer = edge id)
//! ```
//!
//! Every cross-bound call or publish carries a 30 second deadline. Routing
//! misses answer the originating envelope and leave the connection up.

use crate::apis::{Edgebound, Exchange, Servicebound};
use crate::mq::{MqManager, ProduceOptions};
use async_trait::async_trait;
use network::{End, InboundMessage, Message, Request, RequestHandler, Response, Stream, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::{
    append_edge_id, select_index, split_edge_id, EdgeEvent, FrontierError, HashPolicy, MapMap, Result,
    ServiceMeta, RPC_EDGE_OFFLINE, RPC_EDGE_ONLINE, RPC_GET_EDGE_ID,
};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Both halves of a forwarded stream
#[derive(Clone)]
struct StreamPair {
    edge: Stream,
    service: Stream,
}

struct Inner {
    edgebound: Arc<dyn Edgebound>,
    servicebound: Arc<dyn Servicebound>,
    mqm: Arc<MqManager>,
    hash_by: HashPolicy,
    deadline: Duration,
    /// edge id → edge-side stream id → pair
    pairs: MapMap<u64, u64, StreamPair>,
}

#[derive(Clone)]
pub struct Exchanger {
    inner: Arc<Inner>,
}

impl Exchanger {
    pub fn new(
        edgebound: Arc<dyn Edgebound>,
        servicebound: Arc<dyn Servicebound>,
        mqm: Arc<MqManager>,
        hash_by: HashPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                edgebound,
                servicebound,
                mqm,
                hash_by,
                deadline: DEFAULT_DEADLINE,
                pairs: MapMap::new(),
            }),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.deadline = deadline;
        }
        self
    }

    /// Forwarded streams currently open for `edge_id`
    pub fn count_stream_pairs(&self, edge_id: u64) -> usize {
        self.inner.pairs.count(&edge_id)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, TransportError>>,
    {
        match tokio::time::timeout(self.inner.deadline, fut).await {
            Ok(result) => result.map_err(FrontierError::from),
            Err(_) => Err(FrontierError::Timeout(format!(
                "{} exceeded {}ms",
                what,
                self.inner.deadline.as_millis()
            ))),
        }
    }

    /// Call a lifecycle RPC on whichever service registered it
    async fn call_lifecycle(&self, method: &str, data: Vec<u8>) -> Result<Response> {
        let service = self
            .inner
            .servicebound
            .get_service_by_rpc(method)
            .map_err(|_| FrontierError::ServiceNotOnline)?;
        self.bounded(method, service.call(Request::new(method, data))).await
    }

    async fn notify_edge(&self, method: &str, edge: &End) -> Result<()> {
        let event = EdgeEvent {
            edge_id: edge.client_id(),
            meta: edge.meta().to_vec(),
            net: edge.network().to_string(),
            str: edge.remote_addr().to_string(),
        };
        let data = serde_json::to_vec(&event).map_err(|e| FrontierError::Internal(e.to_string()))?;
        self.call_lifecycle(method, data).await.map(|_| ())
    }

    /// Edge → service RPC
    async fn call_service(&self, edge_id: u64, addr: &str, mut request: Request) -> Response {
        let services = match self.inner.servicebound.get_services_by_rpc(&request.method) {
            Ok(services) if !services.is_empty() => services,
            _ => return Response::error(FrontierError::RpcNotOnline),
        };
        let service = &services[select_index(self.inner.hash_by, services.len(), edge_id, addr)];
        request.custom = append_edge_id(&request.custom, edge_id);

        let method = request.method.clone();
        match self.bounded(&method, service.call(request)).await {
            Ok(response) => response,
            Err(err) => {
                debug!(edge_id, rpc = %method, error = %err, "edge call failed");
                Response::error(err.to_wire())
            }
        }
    }

    /// Service → edge RPC; the edge answers with an untagged response
    async fn call_edge(&self, request: Request) -> Response {
        let Some((edge_id, custom)) = split_edge_id(&request.custom) else {
            return Response::error(FrontierError::IllegalEdgeId);
        };
        let Some(edge) = self.inner.edgebound.get_edge_by_id(edge_id) else {
            return Response::error(FrontierError::EdgeNotOnline);
        };

        let method = request.method.clone();
        let request = Request {
            custom,
            ..request
        };
        match self.bounded(&method, edge.call(request)).await {
            Ok(response) => Response {
                data: response.data,
                custom: append_edge_id(&response.custom, edge_id),
                error: None,
            },
            Err(err) => {
                debug!(edge_id, rpc = %method, error = %err, "service call failed");
                Response::error(err.to_wire())
            }
        }
    }

    async fn publish_to_edge(&self, message: &InboundMessage) -> Result<()> {
        let (edge_id, custom) = split_edge_id(message.custom()).ok_or(FrontierError::IllegalEdgeId)?;
        let edge = self
            .inner
            .edgebound
            .get_edge_by_id(edge_id)
            .ok_or(FrontierError::EdgeNotOnline)?;
        let outbound = Message::new(message.topic(), message.data().clone())
            .with_custom(custom)
            .with_cnss(message.cnss());
        self.bounded("publish", edge.publish(outbound)).await
    }

    async fn forward_edge_messages(self, edge: End) {
        let edge_id = edge.client_id();
        while let Some(message) = edge.receive().await {
            let options = ProduceOptions {
                edge_id,
                addr: edge.remote_addr().to_string(),
                custom: message.custom().clone(),
                cnss: message.cnss(),
            };
            match self.inner.mqm.produce(message.topic(), message.data().clone(), &options).await {
                Ok(()) => message.done(),
                Err(err) => {
                    debug!(edge_id, topic = message.topic(), error = %err, "edge publish not delivered");
                    message.error(err.to_wire());
                }
            }
        }
        debug!(edge_id, "edge message forwarding ended");
    }

    async fn forward_service_messages(self, service: End) {
        while let Some(message) = service.receive().await {
            match self.publish_to_edge(&message).await {
                Ok(()) => message.done(),
                Err(err) => {
                    debug!(service_id = service.client_id(), topic = message.topic(), error = %err, "service publish not delivered");
                    message.error(err.to_wire());
                }
            }
        }
        debug!(service_id = service.client_id(), "service message forwarding ended");
    }

    async fn accept_edge_streams(self, edge: End) {
        while let Some(stream) = edge.accept_stream().await {
            let this = self.clone();
            let addr = edge.remote_addr().to_string();
            tokio::spawn(async move {
                if let Err(err) = this.stream_to_service(&addr, stream.clone()).await {
                    warn!(edge_id = stream.client_id(), peer = stream.peer(), error = %err, "edge stream refused");
                    stream.close();
                }
            });
        }
    }

    async fn accept_service_streams(self, service: End) {
        let name = ServiceMeta::from_bytes(service.meta())
            .map(|meta| meta.service)
            .unwrap_or_default();
        while let Some(stream) = service.accept_stream().await {
            let this = self.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(err) = this.stream_to_edge(&name, stream.clone()).await {
                    warn!(service_id = stream.client_id(), peer = stream.peer(), error = %err, "service stream refused");
                    stream.close();
                }
            });
        }
    }

    /// An edge opened a stream naming a service
    async fn stream_to_service(&self, addr: &str, edge_stream: Stream) -> Result<()> {
        let edge_id = edge_stream.client_id();
        let services = self.inner.servicebound.get_services_by_name(edge_stream.peer())?;
        if services.is_empty() {
            return Err(FrontierError::ServiceNotOnline);
        }
        let service = &services[select_index(self.inner.hash_by, services.len(), edge_id, addr)];
        let service_stream = self
            .bounded(
                "open stream",
                service.open_stream(edge_id.to_string(), edge_stream.meta().clone()),
            )
            .await?;
        self.pair(edge_stream, service_stream);
        Ok(())
    }

    /// A service opened a stream naming an edge by decimal id
    async fn stream_to_edge(&self, service_name: &str, service_stream: Stream) -> Result<()> {
        let edge_id: u64 = service_stream
            .peer()
            .parse()
            .map_err(|_| FrontierError::IllegalEdgeId)?;
        let edge = self
            .inner
            .edgebound
            .get_edge_by_id(edge_id)
            .ok_or(FrontierError::EdgeNotOnline)?;
        let edge_stream = self
            .bounded(
                "open stream",
                edge.open_stream(service_name, service_stream.meta().clone()),
            )
            .await?;
        self.pair(edge_stream, service_stream);
        Ok(())
    }

    fn pair(&self, edge: Stream, service: Stream) {
        let edge_id = edge.client_id();
        let key = edge.stream_id();
        info!(
            edge_id,
            edge_stream = key,
            service_id = service.client_id(),
            service_stream = service.stream_id(),
            "stream paired"
        );
        self.inner.pairs.insert(
            edge_id,
            key,
            StreamPair {
                edge: edge.clone(),
                service: service.clone(),
            },
        );

        let relays = edge
            .hijack(StreamRelay {
                exchange: self.clone(),
                to: service.clone(),
            })
            .and_then(|_| {
                service.hijack(StreamRelay {
                    exchange: self.clone(),
                    to: edge.clone(),
                })
            });
        if relays.is_err() {
            edge.close();
            service.close();
        }

        tokio::spawn(copy_raw(edge.clone(), service.clone()));
        tokio::spawn(copy_raw(service.clone(), edge.clone()));
        tokio::spawn(self.clone().copy_messages(edge.clone(), service.clone()));
        tokio::spawn(self.clone().copy_messages(service.clone(), edge.clone()));

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = edge.closed() => {}
                _ = service.closed() => {}
            }
            edge.close();
            service.close();
            this.inner.pairs.remove(&edge_id, &key);
            debug!(edge_id, edge_stream = key, "stream pair closed");
        });
    }

    async fn copy_messages(self, from: Stream, to: Stream) {
        while let Some(message) = from.receive().await {
            let outbound = Message::new(message.topic(), message.data().clone())
                .with_custom(message.custom().clone())
                .with_cnss(message.cnss());
            match self.bounded("publish", to.publish(outbound)).await {
                Ok(()) => message.done(),
                Err(err) => message.error(err.to_wire()),
            }
        }
    }
}

async fn copy_raw(from: Stream, to: Stream) {
    while let Some(data) = from.read_raw().await {
        if to.write_raw(data).await.is_err() {
            break;
        }
    }
    from.close();
    to.close();
}

async fn discard_raw(end: End) {
    while end.read_raw().await.is_some() {}
}

/// Hijacker on an edge's root stream
struct EdgeRpcForwarder {
    exchange: Exchanger,
    edge_id: u64,
    addr: String,
}

#[async_trait]
impl RequestHandler for EdgeRpcForwarder {
    async fn handle(&self, request: Request) -> Response {
        self.exchange.call_service(self.edge_id, &self.addr, request).await
    }
}

/// Hijacker on a service's root stream
struct ServiceRpcForwarder {
    exchange: Exchanger,
}

#[async_trait]
impl RequestHandler for ServiceRpcForwarder {
    async fn handle(&self, request: Request) -> Response {
        self.exchange.call_edge(request).await
    }
}

/// Re-issues every request of one stream half on the other half
struct StreamRelay {
    exchange: Exchanger,
    to: Stream,
}

#[async_trait]
impl RequestHandler for StreamRelay {
    async fn handle(&self, request: Request) -> Response {
        let method = request.method.clone();
        match self.exchange.bounded(&method, self.to.call(request)).await {
            Ok(response) => response,
            Err(err) => Response::error(err.to_wire()),
        }
    }
}

#[async_trait]
impl Exchange for Exchanger {
    async fn get_edge_id(&self, meta: &[u8]) -> Result<u64> {
        let response = self.call_lifecycle(RPC_GET_EDGE_ID, meta.to_vec()).await?;
        let bytes: [u8; 8] = response
            .data
            .as_ref()
            .try_into()
            .map_err(|_| FrontierError::IllegalEdgeId)?;
        match u64::from_be_bytes(bytes) {
            0 => Err(FrontierError::IllegalEdgeId),
            edge_id => Ok(edge_id),
        }
    }

    async fn edge_online(&self, edge: &End) -> Result<()> {
        self.notify_edge(RPC_EDGE_ONLINE, edge).await
    }

    async fn edge_offline(&self, edge: &End) -> Result<()> {
        let edge_id = edge.client_id();
        for pair in self.inner.pairs.remove_all(&edge_id) {
            pair.edge.close();
            pair.service.close();
        }
        self.notify_edge(RPC_EDGE_OFFLINE, edge).await
    }

    fn forward_to_service(&self, edge: &End) {
        let forwarder = EdgeRpcForwarder {
            exchange: self.clone(),
            edge_id: edge.client_id(),
            addr: edge.remote_addr().to_string(),
        };
        if let Err(err) = edge.hijack(forwarder) {
            warn!(edge_id = edge.client_id(), error = %err, "edge hijack failed");
            return;
        }
        tokio::spawn(self.clone().forward_edge_messages(edge.clone()));
        tokio::spawn(self.clone().accept_edge_streams(edge.clone()));
        tokio::spawn(discard_raw(edge.clone()));
    }

    fn forward_to_edge(&self, service: &End) {
        let forwarder = ServiceRpcForwarder {
            exchange: self.clone(),
        };
        if let Err(err) = service.hijack(forwarder) {
            warn!(service_id = service.client_id(), error = %err, "service hijack failed");
            return;
        }
        tokio::spawn(self.clone().forward_service_messages(service.clone()));
        tokio::spawn(self.clone().accept_service_streams(service.clone()));
        tokio::spawn(discard_raw(service.clone()));
    }
}
