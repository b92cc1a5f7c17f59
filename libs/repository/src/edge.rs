//! Edge store.

use crate::index::{OwnerIndex, Rows};
use crate::query::{contains, order_by, EdgeOrder, EdgeQuery, RpcQuery};
use crate::{RepositoryError, Result};
use parking_lot::RwLock;
use tracing::trace;
use types::{Edge, EdgeRpc};

/// Rows describing the live edges of one gateway
pub trait EdgeStore: Send + Sync {
    /// Unconditional insert
    fn create_edge(&self, edge: Edge) -> Result<()>;

    fn create_edge_rpc(&self, rpc: EdgeRpc) -> Result<()>;

    /// Delete the edge row matching both id and address.
    ///
    /// The address keeps a reconnect's fresh row safe from a stale offline.
    fn delete_edge(&self, edge_id: u64, addr: &str) -> Result<()>;

    fn delete_edge_rpcs(&self, edge_id: u64) -> Result<()>;

    fn get_edge(&self, edge_id: u64) -> Result<Edge>;

    /// Edge ids that announced `rpc`
    fn get_edge_ids_by_rpc(&self, rpc: &str) -> Result<Vec<u64>>;

    fn list_edges(&self, query: &EdgeQuery) -> Result<Vec<Edge>>;

    /// Same filters as [`EdgeStore::list_edges`], pagination ignored
    fn count_edges(&self, query: &EdgeQuery) -> Result<usize>;

    fn list_edge_rpcs(&self, query: &RpcQuery) -> Result<Vec<EdgeRpc>>;

    fn count_edge_rpcs(&self, query: &RpcQuery) -> Result<usize>;
}

#[derive(Default)]
struct EdgeTables {
    edges: Rows<Edge>,
    rpcs: Rows<EdgeRpc>,
    by_rpc: OwnerIndex<String>,
}

impl EdgeTables {
    fn matching_edges(&self, query: &EdgeQuery) -> Vec<Edge> {
        let mut rows: Vec<Edge> = self
            .edges
            .scan(query.edge_id)
            .filter(|edge| contains(&query.meta, &edge.meta))
            .filter(|edge| contains(&query.addr, &edge.addr))
            .filter(|edge| query.time.contains(edge.create_time))
            .filter(|edge| {
                query
                    .rpc
                    .as_deref()
                    .map_or(true, |rpc| self.by_rpc.contains(rpc, edge.edge_id))
            })
            .cloned()
            .collect();

        match query.order {
            EdgeOrder::EdgeId => order_by(&mut rows, query.ascending, |e| e.edge_id),
            EdgeOrder::Addr => order_by(&mut rows, query.ascending, |e| e.addr.clone()),
            EdgeOrder::CreateTime => {
                order_by(&mut rows, query.ascending, |e| (e.create_time, e.edge_id))
            }
        }
        rows
    }

    fn matching_rpcs(&self, query: &RpcQuery) -> Vec<EdgeRpc> {
        let mut rows: Vec<EdgeRpc> = self
            .rpcs
            .scan(query.owner_id)
            .filter(|row| contains(&query.rpc, &row.rpc))
            .filter(|row| query.time.contains(row.create_time))
            .cloned()
            .collect();
        order_by(&mut rows, query.ascending, |r| (r.create_time, r.edge_id));
        rows
    }
}

/// In-memory [`EdgeStore`], indexed by edge id and by rpc name
#[derive(Default)]
pub struct MemoryEdgeStore {
    tables: RwLock<EdgeTables>,
}

impl MemoryEdgeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EdgeStore for MemoryEdgeStore {
    fn create_edge(&self, edge: Edge) -> Result<()> {
        trace!(edge_id = edge.edge_id, addr = %edge.addr, "create edge");
        self.tables.write().edges.push(edge.edge_id, edge);
        Ok(())
    }

    fn create_edge_rpc(&self, rpc: EdgeRpc) -> Result<()> {
        let mut tables = self.tables.write();
        tables.by_rpc.insert(rpc.rpc.clone(), rpc.edge_id);
        tables.rpcs.push(rpc.edge_id, rpc);
        Ok(())
    }

    fn delete_edge(&self, edge_id: u64, addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(RepositoryError::EmptyAddress);
        }
        trace!(edge_id, addr, "delete edge");
        self.tables
            .write()
            .edges
            .remove_where(edge_id, |edge| edge.addr == addr);
        Ok(())
    }

    fn delete_edge_rpcs(&self, edge_id: u64) -> Result<()> {
        let mut tables = self.tables.write();
        for row in tables.rpcs.remove_owner(edge_id) {
            tables.by_rpc.remove(&row.rpc, edge_id);
        }
        Ok(())
    }

    fn get_edge(&self, edge_id: u64) -> Result<Edge> {
        self.tables
            .read()
            .edges
            .owned_by(edge_id)
            .first()
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    fn get_edge_ids_by_rpc(&self, rpc: &str) -> Result<Vec<u64>> {
        Ok(self.tables.read().by_rpc.owners(rpc).collect())
    }

    fn list_edges(&self, query: &EdgeQuery) -> Result<Vec<Edge>> {
        let rows = self.tables.read().matching_edges(query);
        Ok(query.page.apply(rows))
    }

    fn count_edges(&self, query: &EdgeQuery) -> Result<usize> {
        Ok(self.tables.read().matching_edges(query).len())
    }

    fn list_edge_rpcs(&self, query: &RpcQuery) -> Result<Vec<EdgeRpc>> {
        let rows = self.tables.read().matching_rpcs(query);
        Ok(query.page.apply(rows))
    }

    fn count_edge_rpcs(&self, query: &RpcQuery) -> Result<usize> {
        Ok(self.tables.read().matching_rpcs(query).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Page, TimeRange};

    fn edge(edge_id: u64, meta: &str, addr: &str, create_time: i64) -> Edge {
        Edge {
            edge_id,
            meta: meta.to_string(),
            addr: addr.to_string(),
            create_time,
        }
    }

    fn rpc(edge_id: u64, name: &str, create_time: i64) -> EdgeRpc {
        EdgeRpc {
            edge_id,
            rpc: name.to_string(),
            create_time,
        }
    }

    fn populated() -> MemoryEdgeStore {
        let store = MemoryEdgeStore::new();
        store.create_edge(edge(1, "sensor-a", "10.0.0.1:5000", 100)).unwrap();
        store.create_edge(edge(2, "sensor-b", "10.0.0.2:5000", 200)).unwrap();
        store.create_edge(edge(3, "camera", "10.0.1.3:5000", 300)).unwrap();
        store.create_edge_rpc(rpc(1, "reboot", 100)).unwrap();
        store.create_edge_rpc(rpc(3, "reboot", 300)).unwrap();
        store.create_edge_rpc(rpc(3, "snapshot", 300)).unwrap();
        store
    }

    fn ids(edges: &[Edge]) -> Vec<u64> {
        edges.iter().map(|e| e.edge_id).collect()
    }

    #[test]
    fn test_default_order_is_newest_first() {
        let store = populated();
        let edges = store.list_edges(&EdgeQuery::default()).unwrap();
        assert_eq!(ids(&edges), vec![3, 2, 1]);
    }

    #[test]
    fn test_filters_compose() {
        let store = populated();

        let query = EdgeQuery {
            meta: Some("sensor".to_string()),
            ascending: true,
            ..Default::default()
        };
        assert_eq!(ids(&store.list_edges(&query).unwrap()), vec![1, 2]);

        let query = EdgeQuery {
            rpc: Some("reboot".to_string()),
            addr: Some("10.0.0.".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&store.list_edges(&query).unwrap()), vec![1]);

        let query = EdgeQuery {
            time: TimeRange {
                start: Some(200),
                end: Some(300),
            },
            ..Default::default()
        };
        assert_eq!(ids(&store.list_edges(&query).unwrap()), vec![2]);
    }

    #[test]
    fn test_count_ignores_pagination() {
        let store = populated();
        let query = EdgeQuery {
            page: Page::new(1, 1),
            ..Default::default()
        };
        assert_eq!(ids(&store.list_edges(&query).unwrap()), vec![2]);
        assert_eq!(store.count_edges(&query).unwrap(), 3);
    }

    #[test]
    fn test_delete_requires_matching_addr() {
        let store = populated();
        store.delete_edge(1, "10.0.0.9:1").unwrap();
        assert!(store.get_edge(1).is_ok());

        store.delete_edge(1, "10.0.0.1:5000").unwrap();
        assert_eq!(store.get_edge(1), Err(RepositoryError::NotFound));
        assert_eq!(store.delete_edge(2, ""), Err(RepositoryError::EmptyAddress));
    }

    #[test]
    fn test_rpc_rows() {
        let store = populated();
        assert_eq!(store.get_edge_ids_by_rpc("reboot").unwrap(), vec![1, 3]);

        let query = RpcQuery {
            owner_id: Some(3),
            ..Default::default()
        };
        assert_eq!(store.count_edge_rpcs(&query).unwrap(), 2);

        store.delete_edge_rpcs(3).unwrap();
        assert_eq!(store.count_edge_rpcs(&query).unwrap(), 0);
        assert_eq!(store.get_edge_ids_by_rpc("reboot").unwrap(), vec![1]);
        assert!(store.get_edge_ids_by_rpc("snapshot").unwrap().is_empty());
    }

    #[test]
    fn test_reconnect_row_survives_stale_delete() {
        let store = populated();
        store.create_edge(edge(1, "sensor-a", "10.0.0.7:5000", 400)).unwrap();
        store.delete_edge(1, "10.0.0.1:5000").unwrap();

        assert_eq!(store.get_edge(1).unwrap().addr, "10.0.0.7:5000");
        let query = EdgeQuery {
            edge_id: Some(1),
            ..Default::default()
        };
        assert_eq!(store.count_edges(&query).unwrap(), 1);
    }
}
