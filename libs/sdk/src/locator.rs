//! Frontier location.
//!
//! The cluster client asks a [`FrontierLocator`] which gateways exist and
//! which one holds a given edge. [`HttpLocator`] answers from the Frontlas
//! REST surface:
//!
//! ```text
//! GET /cluster/v1/frontiers?count=100&cursor=0    → FrontierPage
//! GET /cluster/v1/frontiers/by_edge/{edge_id}     → Frontier | 404
//! ```

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, StatusCode, Uri};
use serde_json::de::from_slice;
use tracing::debug;
use types::{Frontier, FrontierError, FrontierPage, Result};

/// Page size used when scanning frontiers
const SCAN_COUNT: u64 = 100;

#[async_trait]
pub trait FrontierLocator: Send + Sync + 'static {
    /// Every frontier currently registered
    async fn list_frontiers(&self) -> Result<Vec<Frontier>>;

    /// Frontier serving `edge_id`, if the edge is online anywhere
    async fn get_frontier_by_edge(&self, edge_id: u64) -> Result<Option<Frontier>>;
}

/// [`FrontierLocator`] over the Frontlas control plane
#[derive(Clone)]
pub struct HttpLocator {
    base: String,
    client: Client<HttpConnector, Body>,
}

impl HttpLocator {
    /// `base` is `host:port` or a full `http://` URL
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = if base.starts_with("http://") {
            base.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base.trim_end_matches('/'))
        };
        Self {
            base,
            client: Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, hyper::body::Bytes)> {
        let uri: Uri = format!("{}{}", self.base, path)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| FrontierError::IllegalRequest(e.to_string()))?;
        let response = self
            .client
            .get(uri)
            .await
            .map_err(|e| FrontierError::Transport(e.to_string()))?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| FrontierError::Transport(e.to_string()))?;
        Ok((status, body))
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    from_slice(body).map_err(|e| FrontierError::Internal(format!("bad locator reply: {}", e)))
}

fn status_error(status: StatusCode, body: &[u8]) -> FrontierError {
    FrontierError::Remote(format!("{}: {}", status, String::from_utf8_lossy(body)))
}

#[async_trait]
impl FrontierLocator for HttpLocator {
    async fn list_frontiers(&self) -> Result<Vec<Frontier>> {
        let mut frontiers = Vec::new();
        let mut cursor = 0u64;
        loop {
            let path = format!("/cluster/v1/frontiers?count={}&cursor={}", SCAN_COUNT, cursor);
            let (status, body) = self.get(&path).await?;
            if !status.is_success() {
                return Err(status_error(status, &body));
            }
            let page: FrontierPage = decode(&body)?;
            frontiers.extend(page.frontiers);
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }
        debug!(count = frontiers.len(), "listed frontiers");
        Ok(frontiers)
    }

    async fn get_frontier_by_edge(&self, edge_id: u64) -> Result<Option<Frontier>> {
        let path = format!("/cluster/v1/frontiers/by_edge/{}", edge_id);
        let (status, body) = self.get(&path).await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => decode(&body).map(Some),
            s => Err(status_error(s, &body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_normalisation() {
        assert_eq!(HttpLocator::new("127.0.0.1:40011").base, "http://127.0.0.1:40011");
        assert_eq!(HttpLocator::new("http://frontlas:40011/").base, "http://frontlas:40011");
    }
}
