//! In-process [`ClusterStore`].
//!
//! Keeps the Redis semantics: every key carries a deadline, and a lapsed
//! `alive` key removes its record and decrements the frontier counter the
//! way the expiry watcher does. Lapsed keys are swept at the start of every
//! operation. Cursors are offsets into the id-ordered key set.

use super::{ClusterStore, Resident, Ttls};
use crate::error::{FrontlasError, Result};
use crate::keys::Role;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;
use types::{Frontier, FrontierMeta, FrontierStats, Residency};

struct Expiring<T> {
    value: T,
    deadline: Instant,
}

#[derive(Default)]
struct Residents {
    records: BTreeMap<u64, Expiring<Residency>>,
    alive: HashMap<u64, Instant>,
}

#[derive(Default)]
struct State {
    frontiers: BTreeMap<String, Expiring<Frontier>>,
    frontier_alive: HashMap<String, Instant>,
    edges: Residents,
    services: Residents,
}

impl State {
    fn residents(&mut self, role: Role) -> &mut Residents {
        match role {
            Role::Edge => &mut self.edges,
            Role::Service => &mut self.services,
        }
    }

    fn counter(&mut self, frontier_id: &str, role: Role) -> Option<&mut i64> {
        let frontier = &mut self.frontiers.get_mut(frontier_id)?.value;
        Some(match role {
            Role::Edge => &mut frontier.edge_count,
            Role::Service => &mut frontier.service_count,
        })
    }

    fn remove_resident(&mut self, role: Role, id: u64, owner: Option<&str>) -> bool {
        let residents = self.residents(role);
        let Some(record) = residents.records.get(&id) else {
            residents.alive.remove(&id);
            return false;
        };
        if owner.map_or(false, |owner| owner != record.value.frontier_id) {
            return false;
        }
        let frontier_id = record.value.frontier_id.clone();
        residents.records.remove(&id);
        residents.alive.remove(&id);
        if let Some(count) = self.counter(&frontier_id, role) {
            *count = (*count - 1).max(0);
        }
        true
    }

    fn sweep(&mut self, now: Instant) {
        let lapsed: Vec<String> = self
            .frontier_alive
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for frontier_id in lapsed {
            self.frontier_alive.remove(&frontier_id);
            if let Some(frontier) = self.frontiers.get_mut(&frontier_id) {
                frontier.value.edge_count = 0;
                frontier.value.service_count = 0;
            }
        }
        self.frontiers.retain(|_, frontier| frontier.deadline > now);

        for role in [Role::Edge, Role::Service] {
            let residents = self.residents(role);
            let lapsed: Vec<u64> = residents
                .alive
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            for id in lapsed {
                self.remove_resident(role, id, None);
            }
            self.residents(role).records.retain(|_, record| record.deadline > now);
        }
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    ttls: Ttls,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Ttls::default())
    }
}

impl MemoryStore {
    pub fn new(ttls: Ttls) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ttls,
        }
    }

    /// Lock the state with lapsed keys already swept
    fn state(&self) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.sweep(Instant::now());
        state
    }
}

fn page<T>(items: Vec<T>, cursor: u64, count: u64) -> (Vec<T>, u64) {
    let start = cursor as usize;
    let count = count.max(1) as usize;
    let end = start.saturating_add(count).min(items.len());
    let next = if end >= items.len() { 0 } else { end as u64 };
    let page = items.into_iter().skip(start).take(end.saturating_sub(start)).collect();
    (page, next)
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn create_frontier(&self, meta: &FrontierMeta) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state();
        let created = !state.frontiers.contains_key(&meta.frontier_id);
        let deadline = now + self.ttls.frontier_meta;
        let entry = state
            .frontiers
            .entry(meta.frontier_id.clone())
            .or_insert_with(|| Expiring {
                value: Frontier {
                    frontier_id: meta.frontier_id.clone(),
                    ..Frontier::default()
                },
                deadline,
            });
        entry.value.advertised_sb_addr = meta.advertised_sb_addr.clone();
        entry.value.advertised_eb_addr = meta.advertised_eb_addr.clone();
        entry.deadline = deadline;
        state
            .frontier_alive
            .insert(meta.frontier_id.clone(), now + self.ttls.alive);
        Ok(created)
    }

    async fn refresh_frontier(&self, frontier_id: &str) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state();
        let State {
            frontiers,
            frontier_alive,
            ..
        } = &mut *state;
        match (frontiers.get_mut(frontier_id), frontier_alive.get_mut(frontier_id)) {
            (Some(frontier), Some(alive)) => {
                frontier.deadline = now + self.ttls.frontier_meta;
                *alive = now + self.ttls.alive;
                Ok(())
            }
            (Some(frontier), None) => {
                frontier.deadline = now + self.ttls.frontier_meta;
                Err(FrontlasError::ExpireFailed)
            }
            (None, Some(alive)) => {
                *alive = now + self.ttls.alive;
                Err(FrontlasError::ExpireFailed)
            }
            (None, None) => Err(FrontlasError::ExpireFailed),
        }
    }

    async fn delete_frontier(&self, frontier_id: &str) -> Result<()> {
        let mut state = self.state();
        state.frontiers.remove(frontier_id);
        state.frontier_alive.remove(frontier_id);
        Ok(())
    }

    async fn set_frontier_stats(&self, frontier_id: &str, stats: FrontierStats) -> Result<()> {
        let mut state = self.state();
        if let Some(frontier) = state.frontiers.get_mut(frontier_id) {
            frontier.value.edge_count = stats.edge_count.max(0);
            frontier.value.service_count = stats.service_count.max(0);
        }
        Ok(())
    }

    async fn get_frontier(&self, frontier_id: &str) -> Result<Option<Frontier>> {
        Ok(self.state().frontiers.get(frontier_id).map(|f| f.value.clone()))
    }

    async fn get_frontiers(&self, ids: &[String]) -> Result<Vec<Frontier>> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.frontiers.get(id).map(|f| f.value.clone()))
            .collect())
    }

    async fn scan_frontiers(&self, cursor: u64, count: u64) -> Result<(Vec<Frontier>, u64)> {
        let all: Vec<Frontier> = self.state().frontiers.values().map(|f| f.value.clone()).collect();
        Ok(page(all, cursor, count))
    }

    async fn count_frontiers(&self) -> Result<u64> {
        Ok(self.state().frontiers.len() as u64)
    }

    async fn set_resident(&self, role: Role, id: u64, residency: &Residency) -> Result<()> {
        let now = Instant::now();
        let meta_ttl = self.ttls.meta(role);
        let mut state = self.state();
        let residents = state.residents(role);
        residents.records.insert(
            id,
            Expiring {
                value: residency.clone(),
                deadline: now + meta_ttl,
            },
        );
        residents.alive.insert(id, now + self.ttls.alive);
        if let Some(count) = state.counter(&residency.frontier_id, role) {
            *count += 1;
        }
        Ok(())
    }

    async fn refresh_resident(&self, role: Role, id: u64) -> Result<()> {
        let now = Instant::now();
        let meta_ttl = self.ttls.meta(role);
        let mut state = self.state();
        let residents = state.residents(role);
        let record = residents.records.get_mut(&id).map(|record| {
            record.deadline = now + meta_ttl;
        });
        let alive = residents.alive.get_mut(&id).map(|alive| {
            *alive = now + self.ttls.alive;
        });
        match (record, alive) {
            (Some(()), Some(())) => Ok(()),
            _ => Err(FrontlasError::ExpireFailed),
        }
    }

    async fn delete_resident(&self, role: Role, id: u64, owner: Option<&str>) -> Result<bool> {
        Ok(self.state().remove_resident(role, id, owner))
    }

    async fn get_resident(&self, role: Role, id: u64) -> Result<Option<Residency>> {
        Ok(self
            .state()
            .residents(role)
            .records
            .get(&id)
            .map(|record| record.value.clone()))
    }

    async fn get_residents(&self, role: Role, ids: &[u64]) -> Result<Vec<Resident>> {
        let mut state = self.state();
        let residents = state.residents(role);
        Ok(ids
            .iter()
            .filter_map(|id| residents.records.get(id).map(|r| (*id, r.value.clone())))
            .collect())
    }

    async fn scan_residents(&self, role: Role, cursor: u64, count: u64) -> Result<(Vec<Resident>, u64)> {
        let all: Vec<Resident> = self
            .state()
            .residents(role)
            .records
            .iter()
            .map(|(id, record)| (*id, record.value.clone()))
            .collect();
        Ok(page(all, cursor, count))
    }

    async fn count_residents(&self, role: Role) -> Result<u64> {
        let state = self.state();
        Ok(state
            .frontiers
            .values()
            .map(|f| match role {
                Role::Edge => f.value.edge_count,
                Role::Service => f.value.service_count,
            })
            .filter(|count| *count > 0)
            .sum::<i64>() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn meta(frontier_id: &str) -> FrontierMeta {
        FrontierMeta {
            frontier_id: frontier_id.to_string(),
            advertised_sb_addr: format!("{}:30011", frontier_id),
            advertised_eb_addr: format!("{}:30012", frontier_id),
        }
    }

    fn residency(frontier_id: &str) -> Residency {
        Residency {
            frontier_id: frontier_id.to_string(),
            addr: "10.1.1.1:5000".to_string(),
            update_time: 1,
        }
    }

    fn short_ttls() -> Ttls {
        Ttls {
            alive: Duration::from_secs(5),
            edge_meta: Duration::from_secs(10),
            service_meta: Duration::from_secs(10),
            frontier_meta: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_create_frontier_reports_new_rows() {
        let store = MemoryStore::default();
        assert!(store.create_frontier(&meta("f1")).await.unwrap());
        assert!(!store.create_frontier(&meta("f1")).await.unwrap());
        assert_eq!(store.count_frontiers().await.unwrap(), 1);
        let frontier = store.get_frontier("f1").await.unwrap().unwrap();
        assert_eq!(frontier.advertised_sb_addr, "f1:30011");
    }

    #[tokio::test]
    async fn test_residents_drive_frontier_counters() {
        let store = MemoryStore::default();
        store.create_frontier(&meta("f1")).await.unwrap();
        store.set_resident(Role::Edge, 1, &residency("f1")).await.unwrap();
        store.set_resident(Role::Edge, 2, &residency("f1")).await.unwrap();
        store.set_resident(Role::Service, 9, &residency("f1")).await.unwrap();
        assert_eq!(store.count_residents(Role::Edge).await.unwrap(), 2);
        assert_eq!(store.count_residents(Role::Service).await.unwrap(), 1);

        assert!(!store.delete_resident(Role::Edge, 1, Some("f2")).await.unwrap());
        assert!(store.delete_resident(Role::Edge, 1, Some("f1")).await.unwrap());
        assert!(!store.delete_resident(Role::Edge, 1, None).await.unwrap());
        assert_eq!(store.count_residents(Role::Edge).await.unwrap(), 1);
        assert_eq!(store.get_resident(Role::Edge, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_pages_through_everything() {
        let store = MemoryStore::default();
        for id in 1..=5 {
            store.set_resident(Role::Edge, id, &residency("f1")).await.unwrap();
        }
        let (first, cursor) = store.scan_residents(Role::Edge, 0, 2).await.unwrap();
        assert_eq!(first.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(cursor, 2);
        let (_, cursor) = store.scan_residents(Role::Edge, cursor, 2).await.unwrap();
        let (last, cursor) = store.scan_residents(Role::Edge, cursor, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(cursor, 0);

        let picked = store.get_residents(Role::Edge, &[5, 42, 3]).await.unwrap();
        assert_eq!(picked.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![5, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_alive_key_removes_resident() {
        let store = MemoryStore::new(short_ttls());
        store.create_frontier(&meta("f1")).await.unwrap();
        store.set_resident(Role::Edge, 1, &residency("f1")).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        store.refresh_resident(Role::Edge, 1).await.unwrap();
        store.refresh_frontier("f1").await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get_resident(Role::Edge, 1).await.unwrap(), None);
        assert!(matches!(
            store.refresh_resident(Role::Edge, 1).await,
            Err(FrontlasError::ExpireFailed)
        ));
        // the frontier's alive key lapsed too, so its counters are zeroed
        let frontier = store.get_frontier("f1").await.unwrap().unwrap();
        assert_eq!(frontier.edge_count, 0);
        assert!(matches!(
            store.refresh_frontier("f1").await,
            Err(FrontlasError::ExpireFailed)
        ));
    }

    #[tokio::test]
    async fn test_stats_overwrite_counters() {
        let store = MemoryStore::default();
        store.create_frontier(&meta("f1")).await.unwrap();
        store.set_resident(Role::Edge, 1, &residency("f1")).await.unwrap();
        store
            .set_frontier_stats(
                "f1",
                FrontierStats {
                    edge_count: 7,
                    service_count: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.count_residents(Role::Edge).await.unwrap(), 7);
        store.set_frontier_stats("ghost", FrontierStats::default()).await.unwrap();
        assert_eq!(store.count_frontiers().await.unwrap(), 1);
    }
}
