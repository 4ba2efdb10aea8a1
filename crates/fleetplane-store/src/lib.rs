//! Storage layer for fleetplane.
//!
//! This crate persists clusters, datacenters and servers. Two implementations
//! of the [`Store`] trait are provided: [`RocksStore`] for durable storage and
//! [`MemoryStore`] for tests and throwaway deployments.
//!
//! # Architecture
//!
//! The `RocksDB` layout uses the following column families:
//!
//! - `clusters`: Primary cluster records, keyed by `cluster_id`
//! - `clusters_by_name`: Unique index from `name_id` to `cluster_id`
//! - `datacenters`: Primary datacenter records (pools inline), keyed by `datacenter_id`
//! - `datacenters_by_cluster`: Index for listing datacenters of a cluster
//! - `datacenters_by_provider`: Unique index from provider region to `datacenter_id`
//! - `servers`: Primary server records, keyed by `server_id`
//! - `servers_by_datacenter`: Index for listing servers of a datacenter
//! - `servers_by_state`: Index for listing servers in a lifecycle state
//!
//! # Example
//!
//! ```no_run
//! use fleetplane_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/fleetplane-db").unwrap();
//! let cluster = store.get_cluster_by_name("prod").unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rocks::RocksStore;

use fleetplane_core::{
    Captured, Cluster, ClusterId, Datacenter, DatacenterId, Provider, Server, ServerId,
    ServerState,
};

/// The storage trait defining all database operations.
///
/// Implementations only guarantee atomicity of single calls. Callers that
/// need read-modify-write consistency serialize access themselves.
///
/// Clusters and datacenters are stored as [`Captured`] records so that wire
/// keys unknown to this version are persisted with them.
pub trait Store: Send + Sync {
    // =========================================================================
    // Cluster Operations
    // =========================================================================

    /// Insert or update a cluster record.
    ///
    /// This also maintains the name index, dropping the previous name on a
    /// rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_cluster(&self, cluster: &Captured<Cluster>) -> Result<()>;

    /// Get a cluster by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Option<Captured<Cluster>>>;

    /// Look up a cluster by its name identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cluster_by_name(&self, name_id: &str) -> Result<Option<Captured<Cluster>>>;

    /// Delete a cluster by ID.
    ///
    /// Child datacenters are not touched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the cluster doesn't exist.
    fn delete_cluster(&self, cluster_id: &ClusterId) -> Result<()>;

    /// List all clusters in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_clusters(&self) -> Result<Vec<Captured<Cluster>>>;

    // =========================================================================
    // Datacenter Operations
    // =========================================================================

    /// Insert or update a datacenter record, pools included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_datacenter(&self, datacenter: &Captured<Datacenter>) -> Result<()>;

    /// Get a datacenter by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_datacenter(
        &self,
        datacenter_id: &DatacenterId,
    ) -> Result<Option<Captured<Datacenter>>>;

    /// Delete a datacenter by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the datacenter doesn't exist.
    fn delete_datacenter(&self, datacenter_id: &DatacenterId) -> Result<()>;

    /// List the datacenters of a cluster in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_datacenters_by_cluster(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Captured<Datacenter>>>;

    /// Find the datacenter registered for a provider region.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_datacenter_by_provider(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> Result<Option<Captured<Datacenter>>>;

    // =========================================================================
    // Server Operations
    // =========================================================================

    /// Insert or update a server record.
    ///
    /// This also maintains the datacenter and state indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_server(&self, server: &Server) -> Result<()>;

    /// Get a server by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_server(&self, server_id: &ServerId) -> Result<Option<Server>>;

    /// Delete a server by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the server doesn't exist.
    fn delete_server(&self, server_id: &ServerId) -> Result<()>;

    /// List the servers of a datacenter in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers_by_datacenter(&self, datacenter_id: &DatacenterId) -> Result<Vec<Server>>;

    /// List every server in a lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers_by_state(&self, state: ServerState) -> Result<Vec<Server>>;
}
