//! Repository rows, handshake metas, and locator records.

use serde::{Deserialize, Serialize};

/// A live edge as recorded in the edge store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: u64,
    /// Handshake meta, lossily decoded for filtering and display
    pub meta: String,
    pub addr: String,
    /// Unix milliseconds
    pub create_time: i64,
}

/// An RPC an edge announced it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRpc {
    pub edge_id: u64,
    pub rpc: String,
    pub create_time: i64,
}

/// A live service as recorded in the service store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub service_id: u64,
    pub service: String,
    pub addr: String,
    pub create_time: i64,
}

/// An RPC a service registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRpc {
    pub service_id: u64,
    pub rpc: String,
    pub create_time: i64,
}

/// A topic a service declared it receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTopic {
    pub service_id: u64,
    pub topic: String,
    pub create_time: i64,
}

/// Meta a service sends at handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMeta {
    #[serde(alias = "service_name", default)]
    pub service: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ServiceMeta {
    pub fn new(service: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            service: service.into(),
            topics,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Payload of the `edge_online` / `edge_offline` RPCs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub edge_id: u64,
    pub meta: Vec<u8>,
    /// Network of the remote address ("tcp", "mem")
    pub net: String,
    /// The remote address itself
    pub str: String,
}

/// Meta a frontier sends when it dials Frontlas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierMeta {
    pub frontier_id: String,
    pub advertised_sb_addr: String,
    pub advertised_eb_addr: String,
}

/// A frontier instance as the locator sees it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    pub frontier_id: String,
    pub advertised_sb_addr: String,
    pub advertised_eb_addr: String,
    pub edge_count: i64,
    pub service_count: i64,
}

impl Frontier {
    /// Same instance at the same addresses; counters are ignored
    pub fn same_instance(&self, other: &Frontier) -> bool {
        self.frontier_id == other.frontier_id
            && self.advertised_sb_addr == other.advertised_sb_addr
            && self.advertised_eb_addr == other.advertised_eb_addr
    }
}

/// Residency JSON stored under `frontlas:edges:{id}` and `frontlas:services:{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Residency {
    pub frontier_id: String,
    pub addr: String,
    pub update_time: i64,
}

/// An edge as listed by the locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEdge {
    pub edge_id: u64,
    pub frontier_id: String,
    pub addr: String,
    pub update_time: i64,
}

/// A service as listed by the locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterService {
    pub service_id: u64,
    pub frontier_id: String,
    pub addr: String,
    pub update_time: i64,
}

/// Frontier → Frontlas report of an edge life-cycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeReport {
    pub edge_id: u64,
    pub addr: String,
}

/// Frontier → Frontlas report of a service life-cycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub service_id: u64,
    pub addr: String,
}

/// Frontier → Frontlas counter reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStats {
    pub edge_count: i64,
    pub service_count: i64,
}

/// One page of frontiers from the cluster API; `cursor == 0` ends the scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierPage {
    pub frontiers: Vec<Frontier>,
    pub cursor: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePage {
    pub edges: Vec<ClusterEdge>,
    pub cursor: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePage {
    pub services: Vec<ClusterService>,
    pub cursor: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_meta_accepts_both_field_names() {
        let a = ServiceMeta::from_bytes(br#"{"service":"echo","topics":["t"]}"#).unwrap();
        let b = ServiceMeta::from_bytes(br#"{"service_name":"echo","topics":["t"]}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.topics, vec!["t".to_string()]);
    }

    #[test]
    fn test_frontier_same_instance_compares_matching_fields() {
        let a = Frontier {
            frontier_id: "f1".to_string(),
            advertised_sb_addr: "10.0.0.1:30011".to_string(),
            advertised_eb_addr: "10.0.0.1:30012".to_string(),
            edge_count: 3,
            service_count: 1,
        };
        let mut b = a.clone();
        b.edge_count = 0;
        assert!(a.same_instance(&b));

        b.advertised_eb_addr = "10.0.0.1:30011".to_string();
        assert!(!a.same_instance(&b));
    }
}
