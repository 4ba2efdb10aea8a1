//! Per-entity async locks.
//!
//! Every mutation takes the locks of the entities it touches, always in the
//! order cluster name, cluster, provider region, datacenter. There is no
//! global lock, so operations on unrelated entities never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use fleetplane_core::{ClusterId, DatacenterId, Provider};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// An entity that can be locked.
///
/// Variants are declared in lock order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// A cluster name, held while checking and claiming it.
    ClusterName(String),
    /// A cluster and the set of its datacenters.
    Cluster(ClusterId),
    /// A provider region, held while checking and claiming it.
    ProviderRegion(Provider, String),
    /// A datacenter, its pools and its servers.
    Datacenter(DatacenterId),
}

/// Holds an entity lock until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct EntityGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Table of per-entity mutexes, created on first use.
#[derive(Default)]
pub struct LockTable {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockTable {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of an entity.
    pub async fn lock(&self, key: LockKey) -> EntityGuard {
        let mutex = Arc::clone(&*self.locks.entry(key).or_default());
        EntityGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Drop table entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    /// Number of entities with a table entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no entity has a table entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
