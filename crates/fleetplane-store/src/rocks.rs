//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use fleetplane_core::{
    Captured, Cluster, ClusterId, Datacenter, DatacenterId, Provider, Server, ServerId,
    ServerState,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        tracing::info!("rocksdb store opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect the trailing ids of every index key under `prefix`.
    fn scan_index(&self, cf_name: &'static str, prefix: &[u8]) -> Result<Vec<[u8; 16]>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            let id = keys::trailing_id(&key, prefix.len()).ok_or(StoreError::CorruptKey {
                cf: cf_name,
                len: key.len(),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Resolve an index entry holding an id value.
    fn lookup_id(&self, cf_name: &'static str, key: &[u8]) -> Result<Option<[u8; 16]>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|value| {
                keys::id_value(&value).ok_or(StoreError::CorruptKey {
                    cf: cf_name,
                    len: value.len(),
                })
            })
            .transpose()
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Cluster Operations
    // =========================================================================

    fn put_cluster(&self, cluster: &Captured<Cluster>) -> Result<()> {
        let cf_clusters = self.cf(cf::CLUSTERS)?;
        let cf_by_name = self.cf(cf::CLUSTERS_BY_NAME)?;

        let cluster_key = keys::id_key(cluster.cluster_id);
        let value = Self::serialize(cluster)?;

        let old_name = self
            .get_cluster(&cluster.cluster_id)?
            .map(|c| c.into_value().name_id)
            .filter(|name| *name != cluster.name_id);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_clusters, &cluster_key, &value);
        if let Some(old) = old_name {
            batch.delete_cf(&cf_by_name, keys::cluster_name_key(&old));
        }
        batch.put_cf(
            &cf_by_name,
            keys::cluster_name_key(&cluster.name_id),
            &cluster_key,
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Option<Captured<Cluster>>> {
        self.get_record(cf::CLUSTERS, cluster_id.as_bytes())
    }

    fn get_cluster_by_name(&self, name_id: &str) -> Result<Option<Captured<Cluster>>> {
        let Some(id) = self.lookup_id(cf::CLUSTERS_BY_NAME, &keys::cluster_name_key(name_id))?
        else {
            return Ok(None);
        };
        self.get_cluster(&ClusterId::from_bytes(id))
    }

    fn delete_cluster(&self, cluster_id: &ClusterId) -> Result<()> {
        let cf_clusters = self.cf(cf::CLUSTERS)?;
        let cf_by_name = self.cf(cf::CLUSTERS_BY_NAME)?;

        let cluster = self.get_cluster(cluster_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_clusters, keys::id_key(cluster_id));
        batch.delete_cf(&cf_by_name, keys::cluster_name_key(&cluster.name_id));

        self.db.write(batch)?;
        Ok(())
    }

    fn list_clusters(&self) -> Result<Vec<Captured<Cluster>>> {
        let cf = self.cf(cf::CLUSTERS)?;

        let mut clusters = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            clusters.push(Self::deserialize(&value)?);
        }
        Ok(clusters)
    }

    // =========================================================================
    // Datacenter Operations
    // =========================================================================

    fn put_datacenter(&self, datacenter: &Captured<Datacenter>) -> Result<()> {
        let cf_datacenters = self.cf(cf::DATACENTERS)?;
        let cf_by_cluster = self.cf(cf::DATACENTERS_BY_CLUSTER)?;
        let cf_by_provider = self.cf(cf::DATACENTERS_BY_PROVIDER)?;

        let datacenter_key = keys::id_key(datacenter.datacenter_id);
        let value = Self::serialize(datacenter)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_datacenters, &datacenter_key, &value);
        batch.put_cf(
            &cf_by_cluster,
            keys::cluster_datacenter_key(&datacenter.cluster_id, &datacenter.datacenter_id),
            [],
        );
        batch.put_cf(
            &cf_by_provider,
            keys::provider_region_key(datacenter.provider, &datacenter.provider_datacenter_id),
            &datacenter_key,
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn get_datacenter(
        &self,
        datacenter_id: &DatacenterId,
    ) -> Result<Option<Captured<Datacenter>>> {
        self.get_record(cf::DATACENTERS, datacenter_id.as_bytes())
    }

    fn delete_datacenter(&self, datacenter_id: &DatacenterId) -> Result<()> {
        let cf_datacenters = self.cf(cf::DATACENTERS)?;
        let cf_by_cluster = self.cf(cf::DATACENTERS_BY_CLUSTER)?;
        let cf_by_provider = self.cf(cf::DATACENTERS_BY_PROVIDER)?;

        let datacenter = self
            .get_datacenter(datacenter_id)?
            .ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_datacenters, keys::id_key(datacenter_id));
        batch.delete_cf(
            &cf_by_cluster,
            keys::cluster_datacenter_key(&datacenter.cluster_id, datacenter_id),
        );
        batch.delete_cf(
            &cf_by_provider,
            keys::provider_region_key(datacenter.provider, &datacenter.provider_datacenter_id),
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn list_datacenters_by_cluster(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Captured<Datacenter>>> {
        let mut datacenters = Vec::new();
        for id in self.scan_index(cf::DATACENTERS_BY_CLUSTER, cluster_id.as_bytes())? {
            if let Some(dc) = self.get_datacenter(&DatacenterId::from_bytes(id))? {
                datacenters.push(dc);
            }
        }
        Ok(datacenters)
    }

    fn find_datacenter_by_provider(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> Result<Option<Captured<Datacenter>>> {
        let key = keys::provider_region_key(provider, provider_datacenter_id);
        let Some(id) = self.lookup_id(cf::DATACENTERS_BY_PROVIDER, &key)? else {
            return Ok(None);
        };
        self.get_datacenter(&DatacenterId::from_bytes(id))
    }

    // =========================================================================
    // Server Operations
    // =========================================================================

    fn put_server(&self, server: &Server) -> Result<()> {
        let cf_servers = self.cf(cf::SERVERS)?;
        let cf_by_datacenter = self.cf(cf::SERVERS_BY_DATACENTER)?;
        let cf_by_state = self.cf(cf::SERVERS_BY_STATE)?;

        let server_key = keys::id_key(server.server_id);
        let value = Self::serialize(server)?;

        // Check if server exists to handle state index updates
        let old_state = self.get_server(&server.server_id)?.map(|s| s.state);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_servers, &server_key, &value);
        batch.put_cf(
            &cf_by_datacenter,
            keys::datacenter_server_key(&server.datacenter_id, &server.server_id),
            [],
        );
        if let Some(old) = old_state.filter(|old| *old != server.state) {
            batch.delete_cf(&cf_by_state, keys::state_server_key(old, &server.server_id));
        }
        batch.put_cf(
            &cf_by_state,
            keys::state_server_key(server.state, &server.server_id),
            [],
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn get_server(&self, server_id: &ServerId) -> Result<Option<Server>> {
        self.get_record(cf::SERVERS, server_id.as_bytes())
    }

    fn delete_server(&self, server_id: &ServerId) -> Result<()> {
        let cf_servers = self.cf(cf::SERVERS)?;
        let cf_by_datacenter = self.cf(cf::SERVERS_BY_DATACENTER)?;
        let cf_by_state = self.cf(cf::SERVERS_BY_STATE)?;

        let server = self.get_server(server_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_servers, keys::id_key(server_id));
        batch.delete_cf(
            &cf_by_datacenter,
            keys::datacenter_server_key(&server.datacenter_id, server_id),
        );
        batch.delete_cf(&cf_by_state, keys::state_server_key(server.state, server_id));

        self.db.write(batch)?;
        Ok(())
    }

    fn list_servers_by_datacenter(&self, datacenter_id: &DatacenterId) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        for id in self.scan_index(cf::SERVERS_BY_DATACENTER, datacenter_id.as_bytes())? {
            if let Some(server) = self.get_server(&ServerId::from_bytes(id))? {
                servers.push(server);
            }
        }
        Ok(servers)
    }

    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<Server>> {
        let mut servers = Vec::new();
        for id in self.scan_index(cf::SERVERS_BY_STATE, &[keys::state_tag(state)])? {
            if let Some(server) = self.get_server(&ServerId::from_bytes(id))? {
                servers.push(server);
            }
        }
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use fleetplane_core::PoolType;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn cluster_crud() {
        let (store, _dir) = create_test_store();
        testing::cluster_crud(&store);
    }

    #[test]
    fn datacenter_indexes() {
        let (store, _dir) = create_test_store();
        testing::datacenter_indexes(&store);
    }

    #[test]
    fn server_indexes() {
        let (store, _dir) = create_test_store();
        testing::server_indexes(&store);
    }

    #[test]
    fn unknown_fields_are_kept() {
        let (store, _dir) = create_test_store();
        testing::unknown_fields_are_kept(&store);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let cluster = testing::cluster("prod");
        let dc = testing::datacenter(cluster.cluster_id, "us-east");
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.put_cluster(&cluster).unwrap();
            store.put_datacenter(&dc).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_cluster_by_name("prod").unwrap(), Some(cluster));
        let reloaded = store.get_datacenter(&dc.datacenter_id).unwrap().unwrap();
        assert_eq!(reloaded.pool(PoolType::Job).unwrap().max_count, 4);
    }

    #[test]
    fn captured_fields_are_persisted() {
        let (store, _dir) = create_test_store();
        let mut dc: Captured<Datacenter> = serde_json::from_value(serde_json::json!({
            "datacenter_id": "6f1c9a5e-8f7d-4d0a-9b5e-1c2d3e4f5a6b",
            "cluster_id": "0b5f8f0e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
            "name_id": "atl",
            "display_name": "Atlanta",
            "provider": "linode",
            "provider_datacenter_id": "us-southeast",
            "pools": [{
                "pool_type": "gg",
                "hardware": [],
                "desired_count": 0,
                "min_count": 0,
                "max_count": 0,
                "drain_timeout_ms": 0,
                "port_range": [26000, 31999]
            }],
            "build_delivery_method": "s3_direct",
            "create_ts": "2024-05-01T12:00:00Z",
            "labels": ["edge"]
        }))
        .unwrap();
        dc.prebakes_enabled = true;
        store.put_datacenter(&dc).unwrap();

        let reloaded = store.get_datacenter(&dc.datacenter_id).unwrap().unwrap();
        let wire = serde_json::to_value(&reloaded).unwrap();
        assert_eq!(wire["pools"][0]["port_range"], serde_json::json!([26000, 31999]));
        assert_eq!(wire["prebakes_enabled"], true);
        assert_eq!(wire["labels"], serde_json::json!(["edge"]));

        let listed = store.list_datacenters_by_cluster(&dc.cluster_id).unwrap();
        assert_eq!(listed[0].unknown_fields().len(), 1);
    }

    #[test]
    fn captured_cluster_fields_are_persisted() {
        let (store, _dir) = create_test_store();
        let cluster: Captured<Cluster> = serde_json::from_value(serde_json::json!({
            "cluster_id": "0b5f8f0e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
            "name_id": "prod",
            "create_ts": "2024-05-01T12:00:00Z",
            "tier": "gold"
        }))
        .unwrap();
        store.put_cluster(&cluster).unwrap();

        let reloaded = store.get_cluster_by_name("prod").unwrap().unwrap();
        assert_eq!(reloaded, cluster);
        let wire = serde_json::to_value(&reloaded).unwrap();
        assert_eq!(wire["tier"], "gold");
        assert!(wire.get("owner_team_id").is_none());
    }
}
