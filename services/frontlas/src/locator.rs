//! Cluster queries over a [`ClusterStore`].
//!
//! Listings take either explicit ids or a `(cursor, count)` scan step; ids
//! win when both are given, and an id lookup always ends the scan (cursor
//! `0`).

use crate::keys::Role;
use crate::store::{ClusterStore, Resident};
use std::sync::Arc;
use types::{
    ClusterEdge, ClusterService, EdgePage, Frontier, FrontierError, FrontierPage, Result, ServicePage,
};

/// Scan step used when a caller leaves `count` at zero
pub const DEFAULT_COUNT: u64 = 100;

fn edge(resident: Resident) -> ClusterEdge {
    let (edge_id, residency) = resident;
    ClusterEdge {
        edge_id,
        frontier_id: residency.frontier_id,
        addr: residency.addr,
        update_time: residency.update_time,
    }
}

fn service(resident: Resident) -> ClusterService {
    let (service_id, residency) = resident;
    ClusterService {
        service_id,
        frontier_id: residency.frontier_id,
        addr: residency.addr,
        update_time: residency.update_time,
    }
}

fn count_or_default(count: u64) -> u64 {
    if count == 0 {
        DEFAULT_COUNT
    } else {
        count
    }
}

#[derive(Clone)]
pub struct Locator {
    store: Arc<dyn ClusterStore>,
}

impl Locator {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    async fn list_residents(&self, role: Role, cursor: u64, count: u64, ids: &[u64]) -> Result<(Vec<Resident>, u64)> {
        if !ids.is_empty() {
            return Ok((self.store.get_residents(role, ids).await?, 0));
        }
        Ok(self.store.scan_residents(role, cursor, count_or_default(count)).await?)
    }

    pub async fn get_edge(&self, edge_id: u64) -> Result<ClusterEdge> {
        self.store
            .get_resident(Role::Edge, edge_id)
            .await?
            .map(|residency| edge((edge_id, residency)))
            .ok_or(FrontierError::RecordNotFound)
    }

    pub async fn count_edges(&self) -> Result<u64> {
        Ok(self.store.count_residents(Role::Edge).await?)
    }

    pub async fn list_edges(&self, cursor: u64, count: u64, edge_ids: &[u64]) -> Result<EdgePage> {
        let (residents, cursor) = self.list_residents(Role::Edge, cursor, count, edge_ids).await?;
        Ok(EdgePage {
            edges: residents.into_iter().map(edge).collect(),
            cursor,
        })
    }

    pub async fn get_service(&self, service_id: u64) -> Result<ClusterService> {
        self.store
            .get_resident(Role::Service, service_id)
            .await?
            .map(|residency| service((service_id, residency)))
            .ok_or(FrontierError::RecordNotFound)
    }

    pub async fn count_services(&self) -> Result<u64> {
        Ok(self.store.count_residents(Role::Service).await?)
    }

    pub async fn list_services(&self, cursor: u64, count: u64, service_ids: &[u64]) -> Result<ServicePage> {
        let (residents, cursor) = self
            .list_residents(Role::Service, cursor, count, service_ids)
            .await?;
        Ok(ServicePage {
            services: residents.into_iter().map(service).collect(),
            cursor,
        })
    }

    /// The frontier currently holding `edge_id`
    pub async fn get_frontier_by_edge(&self, edge_id: u64) -> Result<Frontier> {
        let residency = self
            .store
            .get_resident(Role::Edge, edge_id)
            .await?
            .ok_or(FrontierError::RecordNotFound)?;
        self.store
            .get_frontier(&residency.frontier_id)
            .await?
            .ok_or(FrontierError::RecordNotFound)
    }

    /// Frontiers by edge ids, by frontier ids, or by scan, in that precedence
    pub async fn list_frontiers(
        &self,
        cursor: u64,
        count: u64,
        edge_ids: &[u64],
        frontier_ids: &[String],
    ) -> Result<FrontierPage> {
        if !edge_ids.is_empty() {
            let residents = self.store.get_residents(Role::Edge, edge_ids).await?;
            let mut ids: Vec<String> = Vec::with_capacity(residents.len());
            for (_, residency) in residents {
                if !ids.contains(&residency.frontier_id) {
                    ids.push(residency.frontier_id);
                }
            }
            return Ok(FrontierPage {
                frontiers: self.store.get_frontiers(&ids).await?,
                cursor: 0,
            });
        }
        if !frontier_ids.is_empty() {
            return Ok(FrontierPage {
                frontiers: self.store.get_frontiers(frontier_ids).await?,
                cursor: 0,
            });
        }
        let (frontiers, cursor) = self.store.scan_frontiers(cursor, count_or_default(count)).await?;
        Ok(FrontierPage { frontiers, cursor })
    }

    pub async fn count_frontiers(&self) -> Result<u64> {
        Ok(self.store.count_frontiers().await?)
    }
}
