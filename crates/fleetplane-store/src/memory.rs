//! In-memory storage implementation.
//!
//! Records are kept in ordered maps keyed by id so that listings come back
//! in the same order as from [`RocksStore`](crate::RocksStore).

use std::collections::BTreeMap;

use fleetplane_core::{
    Captured, Cluster, ClusterId, Datacenter, DatacenterId, Provider, Server, ServerId,
    ServerState,
};
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct Tables {
    clusters: BTreeMap<ClusterId, Captured<Cluster>>,
    datacenters: BTreeMap<DatacenterId, Captured<Datacenter>>,
    servers: BTreeMap<ServerId, Server>,
}

/// Volatile storage backed by a read-write lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put_cluster(&self, cluster: &Captured<Cluster>) -> Result<()> {
        self.tables
            .write()
            .clusters
            .insert(cluster.cluster_id, cluster.clone());
        Ok(())
    }

    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Option<Captured<Cluster>>> {
        Ok(self.tables.read().clusters.get(cluster_id).cloned())
    }

    fn get_cluster_by_name(&self, name_id: &str) -> Result<Option<Captured<Cluster>>> {
        Ok(self
            .tables
            .read()
            .clusters
            .values()
            .find(|c| c.name_id == name_id)
            .cloned())
    }

    fn delete_cluster(&self, cluster_id: &ClusterId) -> Result<()> {
        self.tables
            .write()
            .clusters
            .remove(cluster_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn list_clusters(&self) -> Result<Vec<Captured<Cluster>>> {
        Ok(self.tables.read().clusters.values().cloned().collect())
    }

    fn put_datacenter(&self, datacenter: &Captured<Datacenter>) -> Result<()> {
        self.tables
            .write()
            .datacenters
            .insert(datacenter.datacenter_id, datacenter.clone());
        Ok(())
    }

    fn get_datacenter(
        &self,
        datacenter_id: &DatacenterId,
    ) -> Result<Option<Captured<Datacenter>>> {
        Ok(self.tables.read().datacenters.get(datacenter_id).cloned())
    }

    fn delete_datacenter(&self, datacenter_id: &DatacenterId) -> Result<()> {
        self.tables
            .write()
            .datacenters
            .remove(datacenter_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn list_datacenters_by_cluster(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Captured<Datacenter>>> {
        Ok(self
            .tables
            .read()
            .datacenters
            .values()
            .filter(|dc| dc.cluster_id == *cluster_id)
            .cloned()
            .collect())
    }

    fn find_datacenter_by_provider(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> Result<Option<Captured<Datacenter>>> {
        Ok(self
            .tables
            .read()
            .datacenters
            .values()
            .find(|dc| {
                dc.provider == provider && dc.provider_datacenter_id == provider_datacenter_id
            })
            .cloned())
    }

    fn put_server(&self, server: &Server) -> Result<()> {
        self.tables
            .write()
            .servers
            .insert(server.server_id, server.clone());
        Ok(())
    }

    fn get_server(&self, server_id: &ServerId) -> Result<Option<Server>> {
        Ok(self.tables.read().servers.get(server_id).cloned())
    }

    fn delete_server(&self, server_id: &ServerId) -> Result<()> {
        self.tables
            .write()
            .servers
            .remove(server_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn list_servers_by_datacenter(&self, datacenter_id: &DatacenterId) -> Result<Vec<Server>> {
        Ok(self
            .tables
            .read()
            .servers
            .values()
            .filter(|s| s.datacenter_id == *datacenter_id)
            .cloned()
            .collect())
    }

    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<Server>> {
        Ok(self
            .tables
            .read()
            .servers
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect())
    }
}
