//! Service client.
//!
//! Wraps a service-side end so application code deals in edge ids instead of
//! tagged `custom` bytes.

use async_trait::async_trait;
use bytes::Bytes;
use network::{
    dial, handler_fn, Cnss, Connector, DialOptions, End, InboundMessage, Message, Request,
    RequestHandler, Response, Stream,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use types::{
    append_edge_id, split_edge_id, EdgeEvent, FrontierError, Result, ServiceMeta,
    RPC_EDGE_OFFLINE, RPC_EDGE_ONLINE, RPC_GET_EDGE_ID,
};

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Name edges use to open streams to this service
    pub service: String,
    /// Topics this service receives
    pub topics: Vec<String>,
    /// Ask for a specific id; the gateway allocates one otherwise
    pub service_id: Option<u64>,
    pub heartbeat_interval: Duration,
}

impl ServiceOptions {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            topics: Vec::new(),
            service_id: None,
            heartbeat_interval: Duration::from_secs(20),
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_service_id(mut self, service_id: u64) -> Self {
        self.service_id = Some(service_id);
        self
    }

    fn dial_options(&self) -> DialOptions {
        let meta = ServiceMeta::new(self.service.clone(), self.topics.clone());
        let options = DialOptions::default()
            .with_meta(meta.to_bytes())
            .with_heartbeat_interval(self.heartbeat_interval);
        match self.service_id {
            Some(id) => options.with_client_id(id),
            None => options,
        }
    }
}

/// Serves an edge RPC; `request.custom` arrives with the tag removed
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle(&self, edge_id: u64, request: Request) -> Response;
}

pub struct ServiceFn<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`ServiceHandler`]
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F, Fut>
where
    F: Fn(u64, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    ServiceFn {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> ServiceHandler for ServiceFn<F, Fut>
where
    F: Fn(u64, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, edge_id: u64, request: Request) -> Response {
        (self.f)(edge_id, request).await
    }
}

/// Strips the tag before the application handler sees the request
struct Untagging(Arc<dyn ServiceHandler>);

#[async_trait]
impl RequestHandler for Untagging {
    async fn handle(&self, mut request: Request) -> Response {
        let Some((edge_id, custom)) = split_edge_id(&request.custom) else {
            return Response::error(FrontierError::IllegalEdgeId);
        };
        request.custom = custom;
        self.0.handle(edge_id, request).await
    }
}

/// A message an edge published, tag removed
#[derive(Debug)]
pub struct ServiceMessage {
    edge_id: u64,
    custom: Bytes,
    inner: InboundMessage,
}

impl ServiceMessage {
    fn from_inbound(inner: InboundMessage) -> Self {
        match split_edge_id(inner.custom()) {
            Some((edge_id, custom)) => Self {
                edge_id,
                custom,
                inner,
            },
            None => Self {
                edge_id: 0,
                custom: inner.custom().clone(),
                inner,
            },
        }
    }

    /// Originating edge; `0` when the message carried no tag
    pub fn edge_id(&self) -> u64 {
        self.edge_id
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    pub fn data(&self) -> &Bytes {
        self.inner.data()
    }

    pub fn custom(&self) -> &Bytes {
        &self.custom
    }

    pub fn cnss(&self) -> Cnss {
        self.inner.cnss()
    }

    pub fn done(self) {
        self.inner.done();
    }

    pub fn error(self, err: impl std::fmt::Display) {
        self.inner.error(err);
    }
}

/// A backend connection to a gateway's service port
#[derive(Clone, Debug)]
pub struct ServiceClient {
    end: End,
}

impl ServiceClient {
    pub async fn dial(
        connector: &dyn Connector,
        addr: &str,
        options: &ServiceOptions,
    ) -> Result<Self> {
        let end = dial(connector, addr, options.dial_options()).await?;
        info!(
            service = %options.service,
            service_id = end.client_id(),
            addr,
            "service connected"
        );
        Ok(Self { end })
    }

    pub fn from_end(end: End) -> Self {
        Self { end }
    }

    pub fn service_id(&self) -> u64 {
        self.end.client_id()
    }

    pub fn end(&self) -> &End {
        &self.end
    }

    /// Call `request.method` on edge `edge_id`
    pub async fn call(&self, edge_id: u64, mut request: Request) -> Result<Response> {
        request.custom = append_edge_id(&request.custom, edge_id);
        let mut response = self.end.call(request).await?;
        if let Some((answered_by, custom)) = split_edge_id(&response.custom) {
            debug!(edge_id, answered_by, "tagged response");
            response.custom = custom;
        }
        Ok(response)
    }

    /// Publish to edge `edge_id`
    pub async fn publish(&self, edge_id: u64, mut message: Message) -> Result<()> {
        message.custom = append_edge_id(&message.custom, edge_id);
        Ok(self.end.publish(message).await?)
    }

    /// Serve `method` for edges
    pub fn register(&self, method: impl Into<String>, handler: impl ServiceHandler) -> Result<()> {
        self.register_shared(method.into(), Arc::new(handler))
    }

    pub(crate) fn register_shared(&self, method: String, handler: Arc<dyn ServiceHandler>) -> Result<()> {
        Ok(self.end.register(method, Untagging(handler))?)
    }

    /// Serve `get_edge_id`: map handshake meta to an edge id
    pub fn on_get_edge_id<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = handler_fn(move |request: Request| {
            let f = f.clone();
            async move {
                match f(request.data).await {
                    Ok(edge_id) => Response::ok(Bytes::copy_from_slice(&edge_id.to_be_bytes())),
                    Err(err) => Response::error(err),
                }
            }
        });
        Ok(self.end.register(RPC_GET_EDGE_ID, handler)?)
    }

    /// Serve `edge_online`; an error refuses the edge
    pub fn on_edge_online<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(EdgeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_edge_event(RPC_EDGE_ONLINE, f)
    }

    /// Serve `edge_offline`
    pub fn on_edge_offline<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(EdgeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_edge_event(RPC_EDGE_OFFLINE, f)
    }

    fn register_edge_event<F, Fut>(&self, method: &str, f: F) -> Result<()>
    where
        F: Fn(EdgeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = handler_fn(move |request: Request| {
            let f = f.clone();
            async move {
                let event: EdgeEvent = match serde_json::from_slice(&request.data) {
                    Ok(event) => event,
                    Err(err) => return Response::error(FrontierError::IllegalRequest(err.to_string())),
                };
                match f(event).await {
                    Ok(()) => Response::default(),
                    Err(err) => Response::error(err),
                }
            }
        });
        Ok(self.end.register(method, handler)?)
    }

    /// Next message an edge published to one of this service's topics
    pub async fn receive(&self) -> Option<ServiceMessage> {
        self.end.receive().await.map(ServiceMessage::from_inbound)
    }

    /// Open a stream to edge `edge_id`
    pub async fn open_stream(&self, edge_id: u64) -> Result<Stream> {
        Ok(self.end.open_stream(edge_id.to_string(), Bytes::new()).await?)
    }

    /// Next stream an edge opened to this service; its peer is the edge id
    pub async fn accept_stream(&self) -> Option<Stream> {
        self.end.accept_stream().await
    }

    pub fn close(&self) {
        self.end.close();
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_closed()
    }

    pub async fn closed(&self) {
        self.end.closed().await
    }
}

/// Edge id of a stream accepted by a service
pub fn stream_edge_id(stream: &Stream) -> Option<u64> {
    stream.peer().parse().ok()
}
