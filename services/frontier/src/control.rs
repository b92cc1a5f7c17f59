//! # Control Plane
//!
//! Administrative view of one gateway: repository listings with filters,
//! live stream listings, and kicks. [`ControlPlane`] is the typed surface;
//! [`bind`] exposes it as JSON over HTTP.
//!
//! ## Routes
//!
//! | Method | Path                         | Operation                 |
//! |--------|------------------------------|---------------------------|
//! | GET    | `/v1/edges`                  | list edges                |
//! | GET    | `/v1/edges/count`            | count edges               |
//! | GET    | `/v1/edges/rpcs`             | list edge RPCs            |
//! | GET    | `/v1/edges/{id}`             | get edge                  |
//! | DELETE | `/v1/edges/{id}`             | kick edge                 |
//! | GET    | `/v1/edges/{id}/streams`     | list the edge's streams   |
//! | GET    | `/v1/services`               | list services             |
//! | GET    | `/v1/services/count`         | count services            |
//! | GET    | `/v1/services/rpcs`          | list service RPCs         |
//! | GET    | `/v1/services/topics`        | list service topics       |
//! | GET    | `/v1/services/{id}`          | get service               |
//! | DELETE | `/v1/services/{id}`          | kick service              |
//! | GET    | `/health`                    | serving status            |
//!
//! List filters are query parameters: `edge_id`/`service_id`, `rpc`,
//! `topic`, `meta`, `service`, `addr`, `start_time`/`end_time` (unix ms,
//! `[start, end)`), `order`, `asc`, `offset`, `limit`.

use crate::apis::{Edgebound, Servicebound};
use health_check::{error_response, json_response, HealthReporter};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use repository::{
    EdgeOrder, EdgeQuery, EdgeStore, Page, RpcQuery, ServiceOrder, ServiceQuery, ServiceStore, TimeRange,
    TopicQuery,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};
use types::{Count, Edge, EdgeRpc, FrontierError, Result, Service, ServiceRpc, ServiceTopic};

/// A forwarded or locally opened stream on an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: u64,
    pub peer: String,
}

pub struct ControlPlane {
    edgebound: Arc<dyn Edgebound>,
    servicebound: Arc<dyn Servicebound>,
    edges: Arc<dyn EdgeStore>,
    services: Arc<dyn ServiceStore>,
}

impl ControlPlane {
    pub fn new(
        edgebound: Arc<dyn Edgebound>,
        servicebound: Arc<dyn Servicebound>,
        edges: Arc<dyn EdgeStore>,
        services: Arc<dyn ServiceStore>,
    ) -> Self {
        Self {
            edgebound,
            servicebound,
            edges,
            services,
        }
    }

    pub fn list_edges(&self, query: &EdgeQuery) -> Result<Vec<Edge>> {
        Ok(self.edges.list_edges(query)?)
    }

    pub fn count_edges(&self, query: &EdgeQuery) -> Result<u64> {
        Ok(self.edges.count_edges(query)? as u64)
    }

    pub fn get_edge(&self, edge_id: u64) -> Result<Edge> {
        Ok(self.edges.get_edge(edge_id)?)
    }

    pub fn kick_edge(&self, edge_id: u64) -> Result<()> {
        self.edgebound.del_edge_by_id(edge_id)
    }

    pub fn list_edge_streams(&self, edge_id: u64) -> Result<Vec<StreamInfo>> {
        let mut streams: Vec<StreamInfo> = self
            .edgebound
            .list_streams(edge_id)?
            .into_iter()
            .map(|stream| StreamInfo {
                stream_id: stream.stream_id(),
                peer: stream.peer().to_string(),
            })
            .collect();
        streams.sort_by_key(|s| s.stream_id);
        Ok(streams)
    }

    pub fn list_edge_rpcs(&self, query: &RpcQuery) -> Result<Vec<EdgeRpc>> {
        Ok(self.edges.list_edge_rpcs(query)?)
    }

    pub fn list_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
        Ok(self.services.list_services(query)?)
    }

    pub fn count_services(&self, query: &ServiceQuery) -> Result<u64> {
        Ok(self.services.count_services(query)? as u64)
    }

    pub fn get_service(&self, service_id: u64) -> Result<Service> {
        Ok(self.services.get_service(service_id)?)
    }

    pub fn kick_service(&self, service_id: u64) -> Result<()> {
        self.servicebound.del_service_by_id(service_id)
    }

    pub fn list_service_rpcs(&self, query: &RpcQuery) -> Result<Vec<ServiceRpc>> {
        Ok(self.services.list_service_rpcs(query)?)
    }

    pub fn list_service_topics(&self, query: &TopicQuery) -> Result<Vec<ServiceTopic>> {
        Ok(self.services.list_service_topics(query)?)
    }
}

/// Bind the control plane on `addr`.
///
/// Returns the bound address and the server future, which runs until
/// `shutdown` resolves.
pub fn bind(
    addr: SocketAddr,
    control: Arc<ControlPlane>,
    health: HealthReporter,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::result::Result<(SocketAddr, impl Future<Output = ()> + Send), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let control = Arc::clone(&control);
        let health = health.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let control = Arc::clone(&control);
                let health = health.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &control, &health)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    info!(addr = %local_addr, "control plane listening");
    let running = async move {
        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!(error = %e, "control plane server error");
        }
    };
    Ok((local_addr, running))
}

pub(crate) fn handle_request(req: Request<Body>, control: &ControlPlane, health: &HealthReporter) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let params = query_params(req.uri().query());
    debug!(%method, path = %path, "control plane request");

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => return health.http_response(),

        (&Method::GET, ["v1", "edges"]) => edge_query(&params).and_then(|q| reply(control.list_edges(&q))),
        (&Method::GET, ["v1", "edges", "count"]) => edge_query(&params)
            .and_then(|q| reply(control.count_edges(&q).map(|count| Count { count }))),
        (&Method::GET, ["v1", "edges", "rpcs"]) => {
            rpc_query(&params, "edge_id").and_then(|q| reply(control.list_edge_rpcs(&q)))
        }
        (&Method::GET, ["v1", "edges", id]) => parse_id(id).and_then(|id| reply(control.get_edge(id))),
        (&Method::DELETE, ["v1", "edges", id]) => parse_id(id).and_then(|id| reply(control.kick_edge(id))),
        (&Method::GET, ["v1", "edges", id, "streams"]) => {
            parse_id(id).and_then(|id| reply(control.list_edge_streams(id)))
        }

        (&Method::GET, ["v1", "services"]) => {
            service_query(&params).and_then(|q| reply(control.list_services(&q)))
        }
        (&Method::GET, ["v1", "services", "count"]) => service_query(&params)
            .and_then(|q| reply(control.count_services(&q).map(|count| Count { count }))),
        (&Method::GET, ["v1", "services", "rpcs"]) => {
            rpc_query(&params, "service_id").and_then(|q| reply(control.list_service_rpcs(&q)))
        }
        (&Method::GET, ["v1", "services", "topics"]) => {
            topic_query(&params).and_then(|q| reply(control.list_service_topics(&q)))
        }
        (&Method::GET, ["v1", "services", id]) => parse_id(id).and_then(|id| reply(control.get_service(id))),
        (&Method::DELETE, ["v1", "services", id]) => {
            parse_id(id).and_then(|id| reply(control.kick_service(id)))
        }

        _ => return error_response(StatusCode::NOT_FOUND, format!("no route for {} {}", method, path)),
    };

    match result {
        Ok(response) => response,
        Err(err) => error_response(status_of(&err), err),
    }
}

fn reply<T: Serialize>(result: Result<T>) -> Result<Response<Body>> {
    result.map(|body| json_response(StatusCode::OK, &body))
}

/// HTTP status for an error kind
pub(crate) fn status_of(err: &FrontierError) -> StatusCode {
    match err {
        FrontierError::EdgeNotOnline
        | FrontierError::ServiceNotOnline
        | FrontierError::RecordNotFound => StatusCode::NOT_FOUND,
        FrontierError::IllegalRequest(_) | FrontierError::IllegalEdgeId => StatusCode::BAD_REQUEST,
        FrontierError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type Params = HashMap<String, String>;

fn query_params(query: Option<&str>) -> Params {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| FrontierError::IllegalRequest(format!("bad id {:?}", raw)))
}

fn param<T: std::str::FromStr>(params: &Params, name: &str) -> Result<Option<T>> {
    match params.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| FrontierError::IllegalRequest(format!("bad {} {:?}", name, raw))),
    }
}

fn text(params: &Params, name: &str) -> Option<String> {
    params.get(name).filter(|s| !s.is_empty()).cloned()
}

fn time_range(params: &Params) -> Result<TimeRange> {
    Ok(TimeRange {
        start: param(params, "start_time")?,
        end: param(params, "end_time")?,
    })
}

fn page(params: &Params) -> Result<Page> {
    Ok(Page {
        offset: param(params, "offset")?.unwrap_or(0),
        limit: param(params, "limit")?,
    })
}

fn ascending(params: &Params) -> Result<bool> {
    Ok(param(params, "asc")?.unwrap_or(false))
}

fn edge_query(params: &Params) -> Result<EdgeQuery> {
    let order = match params.get("order").map(String::as_str) {
        None | Some("create_time") => EdgeOrder::CreateTime,
        Some("edge_id") => EdgeOrder::EdgeId,
        Some("addr") => EdgeOrder::Addr,
        Some(other) => return Err(FrontierError::IllegalRequest(format!("bad order {:?}", other))),
    };
    Ok(EdgeQuery {
        edge_id: param(params, "edge_id")?,
        rpc: text(params, "rpc"),
        meta: text(params, "meta"),
        addr: text(params, "addr"),
        time: time_range(params)?,
        order,
        ascending: ascending(params)?,
        page: page(params)?,
    })
}

fn service_query(params: &Params) -> Result<ServiceQuery> {
    let order = match params.get("order").map(String::as_str) {
        None | Some("create_time") => ServiceOrder::CreateTime,
        Some("service_id") => ServiceOrder::ServiceId,
        Some("service") => ServiceOrder::Service,
        Some("addr") => ServiceOrder::Addr,
        Some(other) => return Err(FrontierError::IllegalRequest(format!("bad order {:?}", other))),
    };
    Ok(ServiceQuery {
        service_id: param(params, "service_id")?,
        rpc: text(params, "rpc"),
        topic: text(params, "topic"),
        service: text(params, "service"),
        addr: text(params, "addr"),
        time: time_range(params)?,
        order,
        ascending: ascending(params)?,
        page: page(params)?,
    })
}

fn rpc_query(params: &Params, owner: &str) -> Result<RpcQuery> {
    Ok(RpcQuery {
        owner_id: param(params, owner)?,
        rpc: text(params, "rpc"),
        time: time_range(params)?,
        ascending: ascending(params)?,
        page: page(params)?,
    })
}

fn topic_query(params: &Params) -> Result<TopicQuery> {
    Ok(TopicQuery {
        service_id: param(params, "service_id")?,
        topic: text(params, "topic"),
        time: time_range(params)?,
        ascending: ascending(params)?,
        page: page(params)?,
    })
}
