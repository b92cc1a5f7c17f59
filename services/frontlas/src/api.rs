//! # Cluster API
//!
//! JSON over HTTP view of the [`Locator`].
//!
//! | Method | Path                                   | Reply          |
//! |--------|----------------------------------------|----------------|
//! | GET    | `/cluster/v1/edges`                    | `EdgePage`     |
//! | GET    | `/cluster/v1/edges/count`              | `Count`        |
//! | GET    | `/cluster/v1/edges/{edge_id}`          | `ClusterEdge`  |
//! | GET    | `/cluster/v1/services`                 | `ServicePage`  |
//! | GET    | `/cluster/v1/services/count`           | `Count`        |
//! | GET    | `/cluster/v1/services/{service_id}`    | `ClusterService` |
//! | GET    | `/cluster/v1/frontiers`                | `FrontierPage` |
//! | GET    | `/cluster/v1/frontiers/count`          | `Count`        |
//! | GET    | `/cluster/v1/frontiers/by_edge/{edge_id}` | `Frontier`  |
//! | GET    | `/health`                              | serving status |
//!
//! Listings take `count` and `cursor`, or comma separated `edge_ids`,
//! `service_ids`, `frontier_ids`.

use crate::locator::Locator;
use health_check::{error_response, json_response, HealthReporter};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{debug, error, info};
use types::{Count, FrontierError, Result};

/// Bind the API on `addr`; the returned future serves until `shutdown`
pub fn bind(
    addr: SocketAddr,
    locator: Locator,
    health: HealthReporter,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::result::Result<(SocketAddr, impl Future<Output = ()> + Send), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let locator = locator.clone();
        let health = health.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let locator = locator.clone();
                let health = health.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &locator, &health).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    info!(addr = %local_addr, "cluster api listening");
    let running = async move {
        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!(error = %e, "cluster api server error");
        }
    };
    Ok((local_addr, running))
}

pub(crate) async fn handle_request(req: Request<Body>, locator: &Locator, health: &HealthReporter) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let params = query_params(req.uri().query());
    debug!(%method, path = %path, "cluster api request");

    if method != Method::GET {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, format!("{} not allowed", method));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments == ["health"] {
        return health.http_response();
    }
    match route(&segments, &params, locator).await {
        Ok(Some(response)) => response,
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no route for {} {}", method, path)),
        Err(err) => error_response(status_of(&err), err),
    }
}

async fn route(segments: &[&str], params: &Params, locator: &Locator) -> Result<Option<Response<Body>>> {
    let response = match segments {
        ["cluster", "v1", "edges"] => {
            let (cursor, count) = scan(params)?;
            reply(locator.list_edges(cursor, count, &ids(params, "edge_ids")?).await)?
        }
        ["cluster", "v1", "edges", "count"] => reply(locator.count_edges().await.map(|count| Count { count }))?,
        ["cluster", "v1", "edges", id] => reply(locator.get_edge(parse_id(id)?).await)?,

        ["cluster", "v1", "services"] => {
            let (cursor, count) = scan(params)?;
            reply(locator.list_services(cursor, count, &ids(params, "service_ids")?).await)?
        }
        ["cluster", "v1", "services", "count"] => {
            reply(locator.count_services().await.map(|count| Count { count }))?
        }
        ["cluster", "v1", "services", id] => reply(locator.get_service(parse_id(id)?).await)?,

        ["cluster", "v1", "frontiers"] => {
            let (cursor, count) = scan(params)?;
            let edge_ids = ids(params, "edge_ids")?;
            let frontier_ids = names(params, "frontier_ids");
            reply(locator.list_frontiers(cursor, count, &edge_ids, &frontier_ids).await)?
        }
        ["cluster", "v1", "frontiers", "count"] => {
            reply(locator.count_frontiers().await.map(|count| Count { count }))?
        }
        ["cluster", "v1", "frontiers", "by_edge", id] => {
            reply(locator.get_frontier_by_edge(parse_id(id)?).await)?
        }

        _ => return Ok(None),
    };
    Ok(Some(response))
}

fn reply<T: Serialize>(result: Result<T>) -> Result<Response<Body>> {
    result.map(|body| json_response(StatusCode::OK, &body))
}

fn status_of(err: &FrontierError) -> StatusCode {
    match err {
        FrontierError::RecordNotFound => StatusCode::NOT_FOUND,
        FrontierError::IllegalRequest(_) => StatusCode::BAD_REQUEST,
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

fn number(params: &Params, name: &str) -> Result<u64> {
    match params.get(name) {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| FrontierError::IllegalRequest(format!("bad {} {:?}", name, raw))),
    }
}

/// `(cursor, count)`
fn scan(params: &Params) -> Result<(u64, u64)> {
    Ok((number(params, "cursor")?, number(params, "count")?))
}

fn names(params: &Params, name: &str) -> Vec<String> {
    params
        .get(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn ids(params: &Params, name: &str) -> Result<Vec<u64>> {
    names(params, name).iter().map(|raw| parse_id(raw)).collect()
}
