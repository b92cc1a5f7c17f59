//! Service store.

use crate::index::{OwnerIndex, Rows};
use crate::query::{contains, order_by, RpcQuery, ServiceOrder, ServiceQuery, TopicQuery};
use crate::{RepositoryError, Result};
use parking_lot::RwLock;
use tracing::trace;
use types::{Service, ServiceRpc, ServiceTopic};

/// Rows describing the live services of one gateway
pub trait ServiceStore: Send + Sync {
    fn create_service(&self, service: Service) -> Result<()>;

    fn create_service_rpc(&self, rpc: ServiceRpc) -> Result<()>;

    fn create_service_topic(&self, topic: ServiceTopic) -> Result<()>;

    /// Delete the service row matching both id and address
    fn delete_service(&self, service_id: u64, addr: &str) -> Result<()>;

    fn delete_service_rpcs(&self, service_id: u64) -> Result<()>;

    fn delete_service_topics(&self, service_id: u64) -> Result<()>;

    fn get_service(&self, service_id: u64) -> Result<Service>;

    /// Any one service with this name
    fn get_service_by_name(&self, name: &str) -> Result<Service>;

    /// Any one service that registered `rpc`
    fn get_service_by_rpc(&self, rpc: &str) -> Result<Service>;

    /// Any one service that declared `topic`
    fn get_service_by_topic(&self, topic: &str) -> Result<Service>;

    fn get_services_by_name(&self, name: &str) -> Result<Vec<Service>>;

    fn get_services_by_rpc(&self, rpc: &str) -> Result<Vec<Service>>;

    fn get_services_by_topic(&self, topic: &str) -> Result<Vec<Service>>;

    fn list_services(&self, query: &ServiceQuery) -> Result<Vec<Service>>;

    /// Same filters as [`ServiceStore::list_services`], pagination ignored
    fn count_services(&self, query: &ServiceQuery) -> Result<usize>;

    fn list_service_rpcs(&self, query: &RpcQuery) -> Result<Vec<ServiceRpc>>;

    fn count_service_rpcs(&self, query: &RpcQuery) -> Result<usize>;

    fn list_service_topics(&self, query: &TopicQuery) -> Result<Vec<ServiceTopic>>;

    fn count_service_topics(&self, query: &TopicQuery) -> Result<usize>;
}

#[derive(Default)]
struct ServiceTables {
    services: Rows<Service>,
    rpcs: Rows<ServiceRpc>,
    topics: Rows<ServiceTopic>,
    by_name: OwnerIndex<String>,
    by_rpc: OwnerIndex<String>,
    by_topic: OwnerIndex<String>,
}

impl ServiceTables {
    fn matching_services(&self, query: &ServiceQuery) -> Vec<Service> {
        let mut rows: Vec<Service> = self
            .services
            .scan(query.service_id)
            .filter(|s| contains(&query.service, &s.service))
            .filter(|s| contains(&query.addr, &s.addr))
            .filter(|s| query.time.contains(s.create_time))
            .filter(|s| {
                query
                    .rpc
                    .as_deref()
                    .map_or(true, |rpc| self.by_rpc.contains(rpc, s.service_id))
            })
            .filter(|s| {
                query
                    .topic
                    .as_deref()
                    .map_or(true, |topic| self.by_topic.contains(topic, s.service_id))
            })
            .cloned()
            .collect();

        match query.order {
            ServiceOrder::ServiceId => order_by(&mut rows, query.ascending, |s| s.service_id),
            ServiceOrder::Service => order_by(&mut rows, query.ascending, |s| s.service.clone()),
            ServiceOrder::Addr => order_by(&mut rows, query.ascending, |s| s.addr.clone()),
            ServiceOrder::CreateTime => {
                order_by(&mut rows, query.ascending, |s| (s.create_time, s.service_id))
            }
        }
        rows
    }

    fn matching_rpcs(&self, query: &RpcQuery) -> Vec<ServiceRpc> {
        let mut rows: Vec<ServiceRpc> = self
            .rpcs
            .scan(query.owner_id)
            .filter(|row| contains(&query.rpc, &row.rpc))
            .filter(|row| query.time.contains(row.create_time))
            .cloned()
            .collect();
        order_by(&mut rows, query.ascending, |r| (r.create_time, r.service_id));
        rows
    }

    fn matching_topics(&self, query: &TopicQuery) -> Vec<ServiceTopic> {
        let mut rows: Vec<ServiceTopic> = self
            .topics
            .scan(query.service_id)
            .filter(|row| contains(&query.topic, &row.topic))
            .filter(|row| query.time.contains(row.create_time))
            .cloned()
            .collect();
        order_by(&mut rows, query.ascending, |r| (r.create_time, r.service_id));
        rows
    }

    /// Service rows of the owners listed, ordered by service id
    fn services_of(&self, owners: impl Iterator<Item = u64>) -> Vec<Service> {
        owners
            .flat_map(|owner| self.services.owned_by(owner).iter().cloned())
            .collect()
    }
}

/// In-memory [`ServiceStore`], indexed by service id, name, rpc, and topic
#[derive(Default)]
pub struct MemoryServiceStore {
    tables: RwLock<ServiceTables>,
}

impl MemoryServiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceStore for MemoryServiceStore {
    fn create_service(&self, service: Service) -> Result<()> {
        trace!(service_id = service.service_id, service = %service.service, "create service");
        let mut tables = self.tables.write();
        tables.by_name.insert(service.service.clone(), service.service_id);
        tables.services.push(service.service_id, service);
        Ok(())
    }

    fn create_service_rpc(&self, rpc: ServiceRpc) -> Result<()> {
        let mut tables = self.tables.write();
        tables.by_rpc.insert(rpc.rpc.clone(), rpc.service_id);
        tables.rpcs.push(rpc.service_id, rpc);
        Ok(())
    }

    fn create_service_topic(&self, topic: ServiceTopic) -> Result<()> {
        let mut tables = self.tables.write();
        tables.by_topic.insert(topic.topic.clone(), topic.service_id);
        tables.topics.push(topic.service_id, topic);
        Ok(())
    }

    fn delete_service(&self, service_id: u64, addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(RepositoryError::EmptyAddress);
        }
        trace!(service_id, addr, "delete service");
        let mut tables = self.tables.write();
        let removed = tables.services.remove_where(service_id, |s| s.addr == addr);
        for row in removed {
            let still_named = tables
                .services
                .owned_by(service_id)
                .iter()
                .any(|s| s.service == row.service);
            if !still_named {
                tables.by_name.remove(&row.service, service_id);
            }
        }
        Ok(())
    }

    fn delete_service_rpcs(&self, service_id: u64) -> Result<()> {
        let mut tables = self.tables.write();
        for row in tables.rpcs.remove_owner(service_id) {
            tables.by_rpc.remove(&row.rpc, service_id);
        }
        Ok(())
    }

    fn delete_service_topics(&self, service_id: u64) -> Result<()> {
        let mut tables = self.tables.write();
        for row in tables.topics.remove_owner(service_id) {
            tables.by_topic.remove(&row.topic, service_id);
        }
        Ok(())
    }

    fn get_service(&self, service_id: u64) -> Result<Service> {
        self.tables
            .read()
            .services
            .owned_by(service_id)
            .first()
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    fn get_service_by_name(&self, name: &str) -> Result<Service> {
        first(self.get_services_by_name(name)?)
    }

    fn get_service_by_rpc(&self, rpc: &str) -> Result<Service> {
        first(self.get_services_by_rpc(rpc)?)
    }

    fn get_service_by_topic(&self, topic: &str) -> Result<Service> {
        first(self.get_services_by_topic(topic)?)
    }

    fn get_services_by_name(&self, name: &str) -> Result<Vec<Service>> {
        let tables = self.tables.read();
        Ok(tables
            .services_of(tables.by_name.owners(name))
            .into_iter()
            .filter(|s| s.service == name)
            .collect())
    }

    fn get_services_by_rpc(&self, rpc: &str) -> Result<Vec<Service>> {
        let tables = self.tables.read();
        Ok(tables.services_of(tables.by_rpc.owners(rpc)))
    }

    fn get_services_by_topic(&self, topic: &str) -> Result<Vec<Service>> {
        let tables = self.tables.read();
        Ok(tables.services_of(tables.by_topic.owners(topic)))
    }

    fn list_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
        let rows = self.tables.read().matching_services(query);
        Ok(query.page.apply(rows))
    }

    fn count_services(&self, query: &ServiceQuery) -> Result<usize> {
        Ok(self.tables.read().matching_services(query).len())
    }

    fn list_service_rpcs(&self, query: &RpcQuery) -> Result<Vec<ServiceRpc>> {
        let rows = self.tables.read().matching_rpcs(query);
        Ok(query.page.apply(rows))
    }

    fn count_service_rpcs(&self, query: &RpcQuery) -> Result<usize> {
        Ok(self.tables.read().matching_rpcs(query).len())
    }

    fn list_service_topics(&self, query: &TopicQuery) -> Result<Vec<ServiceTopic>> {
        let rows = self.tables.read().matching_topics(query);
        Ok(query.page.apply(rows))
    }

    fn count_service_topics(&self, query: &TopicQuery) -> Result<usize> {
        Ok(self.tables.read().matching_topics(query).len())
    }
}

fn first(services: Vec<Service>) -> Result<Service> {
    services.into_iter().next().ok_or(RepositoryError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Page;
    use proptest::prelude::*;

    fn service(service_id: u64, name: &str, create_time: i64) -> Service {
        Service {
            service_id,
            service: name.to_string(),
            addr: format!("10.1.0.{}:7000", service_id),
            create_time,
        }
    }

    fn populated() -> MemoryServiceStore {
        let store = MemoryServiceStore::new();
        store.create_service(service(1, "billing", 10)).unwrap();
        store.create_service(service(2, "billing", 20)).unwrap();
        store.create_service(service(3, "telemetry", 30)).unwrap();
        for (id, rpc) in [(1, "charge"), (2, "charge"), (3, "ingest")] {
            store
                .create_service_rpc(ServiceRpc {
                    service_id: id,
                    rpc: rpc.to_string(),
                    create_time: 0,
                })
                .unwrap();
        }
        store
            .create_service_topic(ServiceTopic {
                service_id: 3,
                topic: "metrics".to_string(),
                create_time: 30,
            })
            .unwrap();
        store
    }

    #[test]
    fn test_lookup_by_name_rpc_topic() {
        let store = populated();
        assert_eq!(store.get_services_by_name("billing").unwrap().len(), 2);
        assert_eq!(store.get_service_by_rpc("ingest").unwrap().service_id, 3);
        assert_eq!(store.get_service_by_topic("metrics").unwrap().service_id, 3);
        assert_eq!(
            store.get_service_by_topic("nope"),
            Err(RepositoryError::NotFound)
        );
    }

    #[test]
    fn test_query_join_and_order() {
        let store = populated();
        let query = ServiceQuery {
            rpc: Some("charge".to_string()),
            order: ServiceOrder::ServiceId,
            ascending: true,
            ..Default::default()
        };
        let ids: Vec<u64> = store
            .list_services(&query)
            .unwrap()
            .iter()
            .map(|s| s.service_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let query = ServiceQuery {
            topic: Some("metrics".to_string()),
            service: Some("tele".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count_services(&query).unwrap(), 1);
    }

    #[test]
    fn test_delete_service_and_dependents() {
        let store = populated();
        store.delete_service(3, "10.1.0.3:7000").unwrap();
        store.delete_service_rpcs(3).unwrap();
        store.delete_service_topics(3).unwrap();

        assert_eq!(store.get_service(3), Err(RepositoryError::NotFound));
        assert_eq!(store.count_service_rpcs(&RpcQuery::default()).unwrap(), 2);
        assert_eq!(store.count_service_topics(&TopicQuery::default()).unwrap(), 0);
        assert_eq!(store.get_service_by_topic("metrics"), Err(RepositoryError::NotFound));
        assert!(store.get_services_by_name("telemetry").unwrap().is_empty());
        assert_eq!(store.get_services_by_rpc("charge").unwrap().len(), 2);
    }

    #[test]
    fn test_name_index_follows_the_remaining_rows() {
        let store = populated();
        // A reconnect writes a second row before the stale one is deleted
        store
            .create_service(Service {
                addr: "10.1.0.9:7000".to_string(),
                ..service(3, "telemetry", 40)
            })
            .unwrap();
        store.delete_service(3, "10.1.0.3:7000").unwrap();

        let rows = store.get_services_by_name("telemetry").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].addr, "10.1.0.9:7000");

        let ids: Vec<u64> = store
            .get_services_by_name("billing")
            .unwrap()
            .iter()
            .map(|s| s.service_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn prop_page_never_exceeds_count(offset in 0usize..8, limit in 0usize..8) {
            let store = populated();
            let query = ServiceQuery { page: Page::new(offset, limit), ..Default::default() };
            let listed = store.list_services(&query).unwrap().len();
            let total = store.count_services(&query).unwrap();
            prop_assert_eq!(total, 3);
            prop_assert_eq!(listed, total.saturating_sub(offset).min(limit));
        }
    }
}
