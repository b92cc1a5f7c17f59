//! Frontlas notifications.
//!
//! [`FrontlasInformer`] keeps one end to a Frontlas frontier plane and
//! forwards edge and service life-cycle reports as RPCs. Reports are queued
//! without blocking the caller; a full queue drops the report. The end is
//! redialed with exponential back-off, and counters are reconciled with a
//! `frontier_stats` call after every (re)connect.

use crate::apis::Informer;
use network::{dial, Connector, DialOptions, Request};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{
    EdgeReport, FrontierMeta, FrontierStats, ServiceReport, RPC_EDGE_HEARTBEAT, RPC_EDGE_OFFLINE,
    RPC_EDGE_ONLINE, RPC_FRONTIER_STATS, RPC_SERVICE_HEARTBEAT, RPC_SERVICE_OFFLINE,
    RPC_SERVICE_ONLINE,
};

const REPORT_QUEUE: usize = 4096;
const BACKOFF_START: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Informer used when Frontlas is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInformer;

impl Informer for NoopInformer {
    fn edge_online(&self, _edge_id: u64, _addr: &str) {}
    fn edge_offline(&self, _edge_id: u64, _addr: &str) {}
    fn edge_heartbeat(&self, _edge_id: u64, _addr: &str) {}
    fn service_online(&self, _service_id: u64, _addr: &str) {}
    fn service_offline(&self, _service_id: u64, _addr: &str) {}
    fn service_heartbeat(&self, _service_id: u64, _addr: &str) {}
    fn set_edge_count(&self, _count: usize) {}
    fn set_service_count(&self, _count: usize) {}
}

#[derive(Debug, Clone)]
pub struct FrontlasInformerOptions {
    pub addrs: Vec<String>,
    pub meta: FrontierMeta,
    pub heartbeat_interval: Duration,
}

type Report = (&'static str, Vec<u8>);

#[derive(Default)]
struct Counters {
    edges: AtomicUsize,
    services: AtomicUsize,
}

impl Counters {
    fn stats(&self) -> FrontierStats {
        FrontierStats {
            edge_count: self.edges.load(Ordering::Relaxed) as i64,
            service_count: self.services.load(Ordering::Relaxed) as i64,
        }
    }
}

pub struct FrontlasInformer {
    reports: Sender<Report>,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
}

impl FrontlasInformer {
    /// Start reporting to the first reachable address of `options.addrs`
    pub fn start(connector: Arc<dyn Connector>, options: FrontlasInformerOptions) -> Self {
        let (reports, rx) = mpsc::channel(REPORT_QUEUE);
        let (shutdown, _) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        tokio::spawn(report_loop(
            connector,
            options,
            rx,
            counters.clone(),
            shutdown.subscribe(),
        ));

        Self {
            reports,
            counters,
            shutdown,
        }
    }

    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    fn report(&self, method: &'static str, payload: &impl Serialize) {
        let data = match serde_json::to_vec(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!(method, error = %e, "report encoding failed");
                return;
            }
        };
        match self.reports.try_send((method, data)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(method, "report queue full, dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn report_edge(&self, method: &'static str, edge_id: u64, addr: &str) {
        self.report(
            method,
            &EdgeReport {
                edge_id,
                addr: addr.to_string(),
            },
        );
    }

    fn report_service(&self, method: &'static str, service_id: u64, addr: &str) {
        self.report(
            method,
            &ServiceReport {
                service_id,
                addr: addr.to_string(),
            },
        );
    }
}

impl Drop for FrontlasInformer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Informer for FrontlasInformer {
    fn edge_online(&self, edge_id: u64, addr: &str) {
        self.report_edge(RPC_EDGE_ONLINE, edge_id, addr);
    }

    fn edge_offline(&self, edge_id: u64, addr: &str) {
        self.report_edge(RPC_EDGE_OFFLINE, edge_id, addr);
    }

    fn edge_heartbeat(&self, edge_id: u64, addr: &str) {
        self.report_edge(RPC_EDGE_HEARTBEAT, edge_id, addr);
    }

    fn service_online(&self, service_id: u64, addr: &str) {
        self.report_service(RPC_SERVICE_ONLINE, service_id, addr);
    }

    fn service_offline(&self, service_id: u64, addr: &str) {
        self.report_service(RPC_SERVICE_OFFLINE, service_id, addr);
    }

    fn service_heartbeat(&self, service_id: u64, addr: &str) {
        self.report_service(RPC_SERVICE_HEARTBEAT, service_id, addr);
    }

    fn set_edge_count(&self, count: usize) {
        self.counters.edges.store(count, Ordering::Relaxed);
    }

    fn set_service_count(&self, count: usize) {
        self.counters.services.store(count, Ordering::Relaxed);
    }
}

async fn report_loop(
    connector: Arc<dyn Connector>,
    options: FrontlasInformerOptions,
    mut reports: Receiver<Report>,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    if options.addrs.is_empty() {
        warn!("no frontlas address configured, reports dropped");
        return;
    }
    let meta = match serde_json::to_vec(&options.meta) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(error = %e, "frontier meta encoding failed");
            return;
        }
    };
    let dial_options = DialOptions::default()
        .with_meta(meta)
        .with_heartbeat_interval(options.heartbeat_interval);

    let mut backoff = BACKOFF_START;
    let mut next_addr = 0usize;
    loop {
        if *shutdown.borrow() {
            return;
        }
        let addr = &options.addrs[next_addr % options.addrs.len()];
        next_addr += 1;

        let end = match dial(connector.as_ref(), addr, dial_options.clone()).await {
            Ok(end) => end,
            Err(e) => {
                warn!(addr = %addr, error = %e, retry_in_ms = backoff.as_millis() as u64, "frontlas dial failed");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => return,
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
        };
        info!(addr = %addr, frontier_id = %options.meta.frontier_id, "connected to frontlas");
        backoff = BACKOFF_START;

        let mut ticker = tokio::time::interval(options.heartbeat_interval);
        loop {
            let (method, data) = tokio::select! {
                report = reports.recv() => match report {
                    Some(report) => report,
                    None => {
                        end.close();
                        return;
                    }
                },
                _ = ticker.tick() => match serde_json::to_vec(&counters.stats()) {
                    Ok(data) => (RPC_FRONTIER_STATS, data),
                    Err(_) => continue,
                },
                _ = end.closed() => break,
                _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => {
                    end.close();
                    return;
                }
            };

            match end.call(Request::new(method, data)).await {
                Ok(_) => {}
                Err(e) if e.is_transport_level() => {
                    warn!(method, error = %e, "frontlas report failed, redialing");
                    end.close();
                    break;
                }
                Err(e) => debug!(method, error = %e, "frontlas refused report"),
            }
        }
    }
}
