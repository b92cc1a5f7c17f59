//! Requests, responses, and handlers.

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::marker::PhantomData;

/// An RPC request as seen by both caller and handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub data: Bytes,
    pub custom: Bytes,
}

impl Request {
    pub fn new(method: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            data: data.into(),
            custom: Bytes::new(),
        }
    }

    pub fn with_custom(mut self, custom: impl Into<Bytes>) -> Self {
        self.custom = custom.into();
        self
    }
}

/// An RPC response; a set `error` travels back as the caller's remote error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub data: Bytes,
    pub custom: Bytes,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn error(err: impl std::fmt::Display) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    pub fn with_custom(mut self, custom: impl Into<Bytes>) -> Self {
        self.custom = custom.into();
        self
    }
}

/// Serves inbound requests on an end or stream.
///
/// Requests on one stream reach their handler one at a time, in arrival
/// order.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Adapter turning an async closure into a [`RequestHandler`]
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap `f` as a request handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: Request) -> Response {
        (self.f)(request).await
    }
}
