//! Edge client.

use bytes::Bytes;
use network::{
    dial, Connector, DialOptions, End, InboundMessage, Message, Request, RequestHandler, Response,
    Stream,
};
use std::time::Duration;
use tracing::info;
use types::Result;

#[derive(Debug, Clone)]
pub struct EdgeOptions {
    /// Handed to the id service as `get_edge_id` payload
    pub meta: Bytes,
    /// Ask for a specific id
    pub edge_id: Option<u64>,
    pub heartbeat_interval: Duration,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self {
            meta: Bytes::new(),
            edge_id: None,
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl EdgeOptions {
    pub fn with_meta(mut self, meta: impl Into<Bytes>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn with_edge_id(mut self, edge_id: u64) -> Self {
        self.edge_id = Some(edge_id);
        self
    }
}

/// A device-side connection to a gateway's edge port
#[derive(Clone, Debug)]
pub struct EdgeClient {
    end: End,
}

impl EdgeClient {
    pub async fn dial(connector: &dyn Connector, addr: &str, options: EdgeOptions) -> Result<Self> {
        let mut dial_options = DialOptions::default()
            .with_meta(options.meta)
            .with_heartbeat_interval(options.heartbeat_interval);
        if let Some(edge_id) = options.edge_id {
            dial_options = dial_options.with_client_id(edge_id);
        }
        let end = dial(connector, addr, dial_options).await?;
        info!(edge_id = end.client_id(), addr, "edge connected");
        Ok(Self { end })
    }

    pub fn from_end(end: End) -> Self {
        Self { end }
    }

    /// Id the gateway assigned
    pub fn edge_id(&self) -> u64 {
        self.end.client_id()
    }

    pub fn end(&self) -> &End {
        &self.end
    }

    /// Call whichever service serves `request.method`
    pub async fn call(&self, request: Request) -> Result<Response> {
        Ok(self.end.call(request).await?)
    }

    /// Publish to the services that declared `message.topic`
    pub async fn publish(&self, message: Message) -> Result<()> {
        Ok(self.end.publish(message).await?)
    }

    /// Serve an RPC services may call on this edge
    pub fn register(&self, method: impl Into<String>, handler: impl RequestHandler) -> Result<()> {
        Ok(self.end.register(method, handler)?)
    }

    /// Next message a service published to this edge
    pub async fn receive(&self) -> Option<InboundMessage> {
        self.end.receive().await
    }

    /// Open a stream to the service named `service`
    pub async fn open_stream(&self, service: &str) -> Result<Stream> {
        Ok(self.end.open_stream(service, Bytes::new()).await?)
    }

    /// Next stream a service opened to this edge
    pub async fn accept_stream(&self) -> Option<Stream> {
        self.end.accept_stream().await
    }

    pub fn close(&self) {
        self.end.close();
    }

    pub async fn closed(&self) {
        self.end.closed().await
    }
}
