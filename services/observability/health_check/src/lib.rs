//! # Health Check
//!
//! Serving status shared by the Frontier daemons.
//!
//! A process owns one [`HealthReporter`]. It starts `NOT_SERVING` and the
//! process flips it once start-up completes (listeners bound, backing store
//! reachable). Readers either poll it ([`HealthReporter::check`]) or follow
//! it ([`HealthReporter::watch`]).
//!
//! ## HTTP Mapping
//!
//! | Status        | HTTP |
//! |---------------|------|
//! | `SERVING`     | 200  |
//! | anything else | 417  |
//!
//! [`json_response`] and [`error_response`] are the JSON helpers both
//! daemons' HTTP surfaces build their replies with.
//!
//! ```rust,no_run
//! use health_check::{HealthReporter, ServingStatus};
//!
//! let health = HealthReporter::new("frontlas");
//! // ... bind listeners, connect to the store ...
//! health.set_serving(true);
//! assert_eq!(health.check(), ServingStatus::Serving);
//! ```

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Health status of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
}

impl ServingStatus {
    /// HTTP status code for this serving status
    pub fn http_status(self) -> StatusCode {
        match self {
            ServingStatus::Serving => StatusCode::OK,
            ServingStatus::NotServing => StatusCode::EXPECTATION_FAILED,
        }
    }
}

/// Readiness flag of one process; clones share the flag
#[derive(Debug, Clone)]
pub struct HealthReporter {
    service: Arc<str>,
    status: Arc<watch::Sender<ServingStatus>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthBody {
    service: String,
    status: ServingStatus,
}

impl HealthReporter {
    pub fn new(service: &str) -> Self {
        let (status, _) = watch::channel(ServingStatus::NotServing);
        Self {
            service: Arc::from(service),
            status: Arc::new(status),
        }
    }

    pub fn set_serving(&self, serving: bool) {
        let status = if serving {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(service = %self.service, ?status, "serving status changed");
        }
    }

    /// Current status
    pub fn check(&self) -> ServingStatus {
        *self.status.borrow()
    }

    /// Follow status changes; the receiver starts at the current status
    pub fn watch(&self) -> watch::Receiver<ServingStatus> {
        self.status.subscribe()
    }

    /// `/health` response for the current status
    pub fn http_response(&self) -> Response<Body> {
        let status = self.check();
        let body = HealthBody {
            service: self.service.to_string(),
            status,
        };
        json_response(status.http_status(), &body)
    }
}

/// JSON response with `status`; shared by the daemons' HTTP surfaces
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let mut response = Response::new(Body::from(serde_json::to_vec(body).unwrap_or_default()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `{"error": message}` with `status`
pub fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response<Body> {
    json_response(
        status,
        &ErrorBody {
            error: message.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_serving() {
        let health = HealthReporter::new("frontlas");
        assert_eq!(health.check(), ServingStatus::NotServing);
        assert_eq!(
            health.http_response().status(),
            StatusCode::EXPECTATION_FAILED
        );
    }

    #[tokio::test]
    async fn test_serving_maps_to_ok() {
        let health = HealthReporter::new("frontlas");
        health.set_serving(true);
        let response = health.http_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let parsed: HealthBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, ServingStatus::Serving);
        assert_eq!(parsed.service, "frontlas");
    }

    #[tokio::test]
    async fn test_watch_follows_changes() {
        let health = HealthReporter::new("frontier");
        let mut watch = health.watch();
        assert_eq!(*watch.borrow(), ServingStatus::NotServing);

        let flipper = health.clone();
        tokio::spawn(async move { flipper.set_serving(true) });
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), ServingStatus::Serving);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(StatusCode::NOT_FOUND, "edge not online");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "edge not online");
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&ServingStatus::NotServing).unwrap(),
            "\"NOT_SERVING\""
        );
    }
}
