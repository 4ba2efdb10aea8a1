//! Version counters for long-poll watches.
//!
//! Each watchable collection has a counter that is bumped on every change.
//! A watcher passes the index it last saw and is woken once the counter
//! moves past it. Waiting only touches the counter's channel; no entity lock
//! is held.

use std::time::Duration;

use dashmap::DashMap;
use fleetplane_core::{ClusterId, DatacenterId, WatchIndex};
use tokio::sync::watch;

/// A collection whose changes can be watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Every cluster.
    Clusters,
    /// The datacenters of one cluster.
    Datacenters(ClusterId),
    /// The pools of one datacenter.
    Pools(DatacenterId),
    /// The servers of one datacenter.
    Servers(DatacenterId),
}

/// Registry of per-collection version channels.
#[derive(Default)]
pub struct WatchHub {
    channels: DashMap<Collection, watch::Sender<u64>>,
}

impl WatchHub {
    /// Create a hub where every collection starts at index 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current version of a collection.
    #[must_use]
    pub fn current(&self, collection: Collection) -> WatchIndex {
        self.channels
            .get(&collection)
            .map_or(WatchIndex(0), |tx| {
                let version = *tx.borrow();
                WatchIndex(version)
            })
    }

    /// Advance a collection's version and wake its watchers.
    pub fn bump(&self, collection: Collection) -> WatchIndex {
        let tx = self
            .channels
            .entry(collection)
            .or_insert_with(|| watch::channel(0).0);
        tx.send_modify(|v| *v += 1);
        let index = WatchIndex(*tx.borrow());
        index
    }

    /// Record a change to a cluster record.
    pub fn cluster_changed(&self) {
        self.bump(Collection::Clusters);
    }

    /// Record a change to a datacenter.
    ///
    /// A datacenter change is also a change to its cluster's datacenter list
    /// and to the cluster collection. Pass `pools_changed` when the pools of
    /// the datacenter were part of the change.
    pub fn datacenter_changed(
        &self,
        cluster_id: ClusterId,
        datacenter_id: DatacenterId,
        pools_changed: bool,
    ) {
        if pools_changed {
            self.bump(Collection::Pools(datacenter_id));
        }
        self.bump(Collection::Datacenters(cluster_id));
        self.bump(Collection::Clusters);
    }

    /// Record a change to the servers of a datacenter.
    pub fn servers_changed(&self, datacenter_id: DatacenterId) {
        self.bump(Collection::Servers(datacenter_id));
    }

    /// Wait until a collection moves past `since`.
    ///
    /// Returns immediately when the collection is already past `since`, or
    /// when `since` is ahead of the collection (for example after a restart
    /// reset the counters). Otherwise waits up to `timeout` and returns the
    /// version at wake-up, which equals `since` on timeout.
    pub async fn wait(&self, collection: Collection, since: WatchIndex, timeout: Duration) -> WatchIndex {
        let mut rx = self
            .channels
            .entry(collection)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe();

        let current = *rx.borrow_and_update();
        if current != since.0 {
            return WatchIndex(current);
        }

        let woke = tokio::time::timeout(timeout, rx.wait_for(|v| *v > since.0))
            .await
            .ok()
            .and_then(Result::ok)
            .map(|version| *version);
        woke.map_or_else(|| WatchIndex(*rx.borrow()), WatchIndex)
    }

    /// Forget the counters of a removed datacenter.
    pub fn forget_datacenter(&self, datacenter_id: DatacenterId) {
        self.channels.remove(&Collection::Pools(datacenter_id));
        self.channels.remove(&Collection::Servers(datacenter_id));
    }

    /// Forget the datacenter list counter of a removed cluster.
    ///
    /// Watchers still waiting on it are woken first.
    pub fn forget_cluster(&self, cluster_id: ClusterId) {
        if let Some((_, tx)) = self.channels.remove(&Collection::Datacenters(cluster_id)) {
            tx.send_modify(|v| *v += 1);
        }
    }
}
