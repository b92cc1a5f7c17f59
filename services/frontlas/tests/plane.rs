//! Frontier plane and cluster API over an in-memory network and store.

use frontier_sdk::{FrontierLocator, HttpLocator};
use frontlas::{ClusterStore, Frontlas, MemoryStore, Role};
use network::{dial, DialOptions, End, MemoryNetwork, Request, TransportError};
use std::sync::Arc;
use std::time::Duration;
use types::{
    EdgeReport, FrontierError, FrontierMeta, FrontierStats, ServiceReport, RPC_EDGE_HEARTBEAT,
    RPC_EDGE_OFFLINE, RPC_EDGE_ONLINE, RPC_FRONTIER_STATS, RPC_SERVICE_ONLINE,
};

struct Harness {
    net: MemoryNetwork,
    store: Arc<MemoryStore>,
    frontlas: Frontlas,
}

impl Harness {
    fn start() -> Self {
        let net = MemoryNetwork::new();
        let store = Arc::new(MemoryStore::default());
        let listener = net.listen("frontier_plane").unwrap();
        let frontlas = Frontlas::start(
            store.clone(),
            listener,
            Some("127.0.0.1:0".parse().unwrap()),
        )
        .unwrap();
        Self { net, store, frontlas }
    }

    async fn frontier(&self, frontier_id: &str) -> End {
        let meta = FrontierMeta {
            frontier_id: frontier_id.to_string(),
            advertised_sb_addr: format!("{}.local:30011", frontier_id),
            advertised_eb_addr: format!("{}.local:30012", frontier_id),
        };
        let options = DialOptions::default().with_meta(serde_json::to_vec(&meta).unwrap());
        let end = dial(&self.net, "frontier_plane", options).await.unwrap();
        // online completes after the handshake reply
        let plane = self.frontlas.plane();
        eventually(|| async { plane.frontier_ids().iter().any(|id| id == frontier_id) }).await;
        end
    }

    fn locator(&self) -> HttpLocator {
        HttpLocator::new(self.frontlas.api_addr().unwrap().to_string())
    }
}

async fn report(end: &End, method: &str, payload: &impl serde::Serialize) -> Result<(), TransportError> {
    end.call(Request::new(method, serde_json::to_vec(payload).unwrap()))
        .await
        .map(|_| ())
}

fn edge(edge_id: u64) -> EdgeReport {
    EdgeReport {
        edge_id,
        addr: format!("192.168.0.{}:6000", edge_id),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_frontier_registers_on_connect() {
    let h = Harness::start();
    let _f1 = h.frontier("f1").await;

    let frontier = h.store.get_frontier("f1").await.unwrap().unwrap();
    assert_eq!(frontier.advertised_sb_addr, "f1.local:30011");
    assert_eq!(frontier.edge_count, 0);
    assert_eq!(h.frontlas.plane().frontier_ids(), vec!["f1".to_string()]);
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_edge_reports_drive_lookups() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;
    let f2 = h.frontier("f2").await;

    report(&f1, RPC_EDGE_ONLINE, &edge(1)).await.unwrap();
    report(&f1, RPC_EDGE_ONLINE, &edge(2)).await.unwrap();
    report(&f2, RPC_EDGE_ONLINE, &edge(3)).await.unwrap();
    report(
        &f2,
        RPC_SERVICE_ONLINE,
        &ServiceReport {
            service_id: 10,
            addr: "10.0.0.10:7000".to_string(),
        },
    )
    .await
    .unwrap();

    let locator = h.locator();
    let frontier = locator.get_frontier_by_edge(3).await.unwrap().unwrap();
    assert_eq!(frontier.frontier_id, "f2");
    assert_eq!(frontier.service_count, 1);
    assert_eq!(locator.get_frontier_by_edge(99).await.unwrap(), None);

    let mut frontiers = locator.list_frontiers().await.unwrap();
    frontiers.sort_by(|a, b| a.frontier_id.cmp(&b.frontier_id));
    let counts: Vec<_> = frontiers.iter().map(|f| (f.frontier_id.as_str(), f.edge_count)).collect();
    assert_eq!(counts, vec![("f1", 2), ("f2", 1)]);

    assert_eq!(h.frontlas.locator().count_edges().await.unwrap(), 3);
    assert_eq!(h.frontlas.locator().count_services().await.unwrap(), 1);
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_offline_is_owner_guarded() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;
    let f2 = h.frontier("f2").await;

    report(&f1, RPC_EDGE_ONLINE, &edge(5)).await.unwrap();
    // the edge moved to f2 before f1's offline report arrived
    report(&f2, RPC_EDGE_ONLINE, &edge(5)).await.unwrap();
    report(&f1, RPC_EDGE_OFFLINE, &edge(5)).await.unwrap();

    let resident = h.store.get_resident(Role::Edge, 5).await.unwrap().unwrap();
    assert_eq!(resident.frontier_id, "f2");

    report(&f2, RPC_EDGE_OFFLINE, &edge(5)).await.unwrap();
    assert_eq!(h.store.get_resident(Role::Edge, 5).await.unwrap(), None);
    let f2_row = h.store.get_frontier("f2").await.unwrap().unwrap();
    assert_eq!(f2_row.edge_count, 0);
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_heartbeat_recreates_lapsed_resident() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;

    report(&f1, RPC_EDGE_HEARTBEAT, &edge(8)).await.unwrap();
    let resident = h.store.get_resident(Role::Edge, 8).await.unwrap().unwrap();
    assert_eq!(resident.frontier_id, "f1");
    assert_eq!(resident.addr, "192.168.0.8:6000");
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_frontier_stats_reconcile_counters() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;
    report(&f1, RPC_EDGE_ONLINE, &edge(1)).await.unwrap();
    report(
        &f1,
        RPC_FRONTIER_STATS,
        &FrontierStats {
            edge_count: 12,
            service_count: 3,
        },
    )
    .await
    .unwrap();

    let row = h.store.get_frontier("f1").await.unwrap().unwrap();
    assert_eq!((row.edge_count, row.service_count), (12, 3));
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_bad_reports_are_answered_with_errors() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;

    let err = f1.call(Request::new("edge_teleport", "{}")).await.unwrap_err();
    assert!(matches!(
        FrontierError::from(err),
        FrontierError::Unimplemented(method) if method == "edge_teleport"
    ));

    let err = f1.call(Request::new(RPC_EDGE_ONLINE, "not json")).await.unwrap_err();
    assert!(matches!(FrontierError::from(err), FrontierError::IllegalRequest(_)));
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_disconnect_deletes_frontier_row() {
    let h = Harness::start();
    let f1 = h.frontier("f1").await;
    assert_eq!(h.store.count_frontiers().await.unwrap(), 1);

    f1.close();
    eventually(|| async { h.store.count_frontiers().await.unwrap() == 0 }).await;
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_reconnect_keeps_frontier_row() {
    let h = Harness::start();
    let first = h.frontier("f1").await;
    let second = h.frontier("f1").await;

    tokio::time::timeout(Duration::from_secs(5), first.closed())
        .await
        .expect("previous connection not closed");
    // the displaced connection's offline must not delete the new registration
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.get_frontier("f1").await.unwrap().is_some());
    assert!(!second.is_closed());
    h.frontlas.close().await;
}

#[tokio::test]
async fn test_bad_meta_is_rejected() {
    let h = Harness::start();
    let options = DialOptions::default().with_meta(&b"{\"frontier_id\":\"\"}"[..]);
    let err = dial(&h.net, "frontier_plane", options).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected(_)));
    assert_eq!(h.store.count_frontiers().await.unwrap(), 0);
    h.frontlas.close().await;
}
