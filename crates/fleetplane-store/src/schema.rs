//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary cluster records, keyed by `cluster_id`.
    pub const CLUSTERS: &str = "clusters";

    /// Index: cluster id by `name_id`.
    pub const CLUSTERS_BY_NAME: &str = "clusters_by_name";

    /// Primary datacenter records, keyed by `datacenter_id`.
    pub const DATACENTERS: &str = "datacenters";

    /// Index: datacenters by cluster, keyed by `cluster_id || datacenter_id`.
    pub const DATACENTERS_BY_CLUSTER: &str = "datacenters_by_cluster";

    /// Index: datacenter id by `provider || 0x00 || provider_datacenter_id`.
    pub const DATACENTERS_BY_PROVIDER: &str = "datacenters_by_provider";

    /// Primary server records, keyed by `server_id`.
    pub const SERVERS: &str = "servers";

    /// Index: servers by datacenter, keyed by `datacenter_id || server_id`.
    pub const SERVERS_BY_DATACENTER: &str = "servers_by_datacenter";

    /// Index: servers by lifecycle state, keyed by `state || server_id`.
    pub const SERVERS_BY_STATE: &str = "servers_by_state";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::CLUSTERS,
        cf::CLUSTERS_BY_NAME,
        cf::DATACENTERS,
        cf::DATACENTERS_BY_CLUSTER,
        cf::DATACENTERS_BY_PROVIDER,
        cf::SERVERS,
        cf::SERVERS_BY_DATACENTER,
        cf::SERVERS_BY_STATE,
    ]
}
