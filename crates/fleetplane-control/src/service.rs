//! Control plane service implementation.
//!
//! This module provides the [`ControlPlane`] trait and the
//! [`ControlPlaneService`] implementation that coordinates clusters,
//! datacenters, pools and servers on top of a [`Store`] and a
//! [`ProviderClient`].
//!
//! Every mutation runs under the entity locks of what it touches (see
//! [`crate::locks`]) and bumps the watch counters of the collections it
//! changed once the change is stored.

use std::net::IpAddr;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleetplane_core::{
    validate_name_id, Captured, Cluster, ClusterId, Datacenter, DatacenterId, Patch, Pool,
    PoolType, Provider, Server, ServerId, ServerState, WatchIndex,
};
use fleetplane_store::{Store, StoreError};

use crate::drain::DrainTimers;
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::locks::{EntityGuard, LockKey, LockTable};
use crate::pools;
use crate::provider::{ProviderClient, ProvisionRequest};
use crate::retry::RetryExecutor;
use crate::types::{
    ClusterPatch, ControlConfig, CreateClusterRequest, CreateDatacenterRequest, DatacenterPatch,
    PoolUpdate, ProvisionFailure, Reconciled, ScaleReport, ServerFailure, Watched,
};
use crate::watch::{Collection, WatchHub};

/// Trait defining the control plane operations.
///
/// This trait provides the complete API for managing the cluster hierarchy
/// and its servers. Implementations handle persistence, validation,
/// provider calls and change notification.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Cluster Registry
    // =========================================================================

    /// Create a new cluster.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed name and
    /// `ControlError::ClusterNameTaken` if the name is in use.
    async fn create_cluster(
        &self,
        request: Captured<CreateClusterRequest>,
    ) -> Result<Captured<Cluster>>;

    /// Get a cluster by ID.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ClusterNotFound` if the cluster doesn't exist.
    async fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Captured<Cluster>>;

    /// List all clusters.
    async fn list_clusters(&self) -> Result<Vec<Captured<Cluster>>>;

    /// Find a cluster by its name.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ClusterNameNotFound` if no cluster has the name.
    async fn resolve_cluster_name(&self, name_id: &str) -> Result<Captured<Cluster>>;

    /// Rename a cluster or change its owner.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ClusterNameTaken` if the new name is in use.
    async fn update_cluster(
        &self,
        cluster_id: &ClusterId,
        patch: Captured<ClusterPatch>,
    ) -> Result<Captured<Cluster>>;

    /// Delete a cluster and all of its datacenters.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LiveServers` if any server is still live and
    /// `force` is not set.
    async fn delete_cluster(&self, cluster_id: &ClusterId, force: bool) -> Result<()>;

    // =========================================================================
    // Datacenter Manager
    // =========================================================================

    /// Create a datacenter and bring its pools up to their targets.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the request is malformed or the provider
    /// does not know the region, and a conflict if the name or the provider
    /// region is taken.
    async fn create_datacenter(
        &self,
        cluster_id: &ClusterId,
        request: Captured<CreateDatacenterRequest>,
    ) -> Result<Reconciled<Captured<Datacenter>>>;

    /// Get a datacenter by ID.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DatacenterNotFound` if the datacenter doesn't exist.
    async fn get_datacenter(&self, datacenter_id: &DatacenterId) -> Result<Captured<Datacenter>>;

    /// List the datacenters of a cluster.
    async fn list_datacenters(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Captured<Datacenter>>>;

    /// List the pools of a datacenter.
    async fn list_pools(&self, datacenter_id: &DatacenterId) -> Result<Vec<Captured<Pool>>>;

    /// Update a datacenter's settings and pools in one step.
    ///
    /// Either every change is applied or none is.
    async fn update_datacenter(
        &self,
        datacenter_id: &DatacenterId,
        patch: Captured<DatacenterPatch>,
    ) -> Result<Reconciled<Captured<Datacenter>>>;

    /// Delete a datacenter and its servers.
    async fn delete_datacenter(&self, datacenter_id: &DatacenterId, force: bool) -> Result<()>;

    // =========================================================================
    // Pool Controller
    // =========================================================================

    /// Update one pool and reconcile it.
    async fn update_pool(
        &self,
        datacenter_id: &DatacenterId,
        update: PoolUpdate,
    ) -> Result<Reconciled<Captured<Pool>>>;

    /// Bring a pool to its target without changing it.
    async fn reconcile_pool(
        &self,
        datacenter_id: &DatacenterId,
        pool_type: PoolType,
    ) -> Result<ScaleReport>;

    // =========================================================================
    // Server Inventory
    // =========================================================================

    /// Record that a server finished provisioning.
    async fn confirm_provisioned(
        &self,
        server_id: &ServerId,
        public_ip: IpAddr,
    ) -> Result<Reconciled<Server>>;

    /// Record a server's health.
    async fn report_health(&self, server_id: &ServerId, healthy: bool) -> Result<Server>;

    /// Record that a draining server has no work left and terminate it.
    async fn confirm_drained(&self, server_id: &ServerId) -> Result<Server>;

    /// Get a server by ID.
    async fn get_server(&self, server_id: &ServerId) -> Result<Server>;

    /// List the servers of a datacenter.
    async fn list_servers(&self, datacenter_id: &DatacenterId) -> Result<Vec<Server>>;

    /// Remove terminated servers past the retention window.
    ///
    /// Returns the number of servers removed.
    async fn purge_terminated(&self) -> Result<usize>;

    // =========================================================================
    // Watches
    // =========================================================================

    /// List clusters, waiting for a change past `since` if given.
    async fn watch_clusters(
        &self,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Cluster>>>>;

    /// List a cluster's datacenters, waiting for a change past `since` if given.
    async fn watch_datacenters(
        &self,
        cluster_id: &ClusterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Datacenter>>>>;

    /// List a datacenter's pools, waiting for a change past `since` if given.
    async fn watch_pools(
        &self,
        datacenter_id: &DatacenterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Pool>>>>;

    /// List a datacenter's servers, waiting for a change past `since` if given.
    async fn watch_servers(
        &self,
        datacenter_id: &DatacenterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Server>>>;
}

/// The main control plane service implementation.
///
/// Cloning is cheap and every clone shares the same state.
pub struct ControlPlaneService<S: Store> {
    inner: Arc<Inner<S>>,
}

impl<S: Store> Clone for ControlPlaneService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: Store> {
    store: Arc<S>,
    provider: Arc<dyn ProviderClient>,
    locks: LockTable,
    watches: WatchHub,
    timers: DrainTimers,
    retry: RetryExecutor,
    config: ControlConfig,
}

impl<S: Store + 'static> ControlPlaneService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(store: Arc<S>, provider: Arc<dyn ProviderClient>, config: ControlConfig) -> Self {
        let retry = RetryExecutor::new(config.retry.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                locks: LockTable::new(),
                watches: WatchHub::new(),
                timers: DrainTimers::new(),
                retry,
                config,
            }),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, provider: Arc<dyn ProviderClient>) -> Self {
        Self::new(store, provider, ControlConfig::default())
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        &self.inner.config
    }

    /// Number of servers with a pending drain timer.
    #[must_use]
    pub fn pending_drains(&self) -> usize {
        self.inner.timers.len()
    }

    /// Re-arm the drain timers of servers that were already draining when
    /// the service started.
    ///
    /// Drain timers only live in memory, so this has to run once before the
    /// service takes requests. Each timer gets what is left of its pool's
    /// drain timeout, counted from the server's `drain_ts`; servers past
    /// their deadline are terminated right away.
    ///
    /// Returns the number of timers armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn recover_drains(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut armed = 0;

        for server in inner.store.list_servers_by_state(ServerState::Draining)? {
            let _guard = inner
                .locks
                .lock(LockKey::Datacenter(server.datacenter_id))
                .await;
            let Some(datacenter) = inner.store.get_datacenter(&server.datacenter_id)? else {
                tracing::warn!(
                    server_id = %server.server_id,
                    datacenter_id = %server.datacenter_id,
                    "Draining server has no datacenter"
                );
                continue;
            };

            let timeout_ms = datacenter
                .pool(server.pool_type)
                .map_or(0, |pool| pool.drain_timeout_ms);
            let elapsed_ms = server.drain_ts.map_or(0, |drain_ts| {
                u64::try_from((Utc::now() - drain_ts).num_milliseconds()).unwrap_or(0)
            });
            let remaining_ms = timeout_ms.saturating_sub(elapsed_ms);

            inner.arm_drain_timer(&server, remaining_ms);
            tracing::info!(
                server_id = %server.server_id,
                remaining_ms,
                "Recovered drain timer"
            );
            armed += 1;
        }

        if armed > 0 {
            tracing::info!(armed, "Recovered drain timers");
        }
        Ok(armed)
    }
}

impl<S: Store + 'static> Inner<S> {
    fn cluster(&self, cluster_id: &ClusterId) -> Result<Captured<Cluster>> {
        self.store
            .get_cluster(cluster_id)?
            .ok_or(ControlError::ClusterNotFound(*cluster_id))
    }

    fn datacenter(&self, datacenter_id: &DatacenterId) -> Result<Captured<Datacenter>> {
        self.store
            .get_datacenter(datacenter_id)?
            .ok_or(ControlError::DatacenterNotFound(*datacenter_id))
    }

    fn server(&self, server_id: &ServerId) -> Result<Server> {
        self.store
            .get_server(server_id)?
            .ok_or(ControlError::ServerNotFound(*server_id))
    }

    /// Lock a server's datacenter and read the server under the lock.
    async fn lock_server(&self, server_id: &ServerId) -> Result<(EntityGuard, Server)> {
        let datacenter_id = self.server(server_id)?.datacenter_id;
        let guard = self.locks.lock(LockKey::Datacenter(datacenter_id)).await;
        let server = self.server(server_id)?;
        Ok((guard, server))
    }

    async fn wait(&self, collection: Collection, since: Option<WatchIndex>) -> WatchIndex {
        match since {
            Some(since) => {
                self.watches
                    .wait(collection, since, self.config.watch_timeout)
                    .await
            }
            None => self.watches.current(collection),
        }
    }

    /// Bring one pool to its target. The datacenter lock must be held.
    async fn reconcile_locked(
        self: &Arc<Self>,
        datacenter: &Datacenter,
        pool: &Pool,
    ) -> Result<ScaleReport> {
        let datacenter_id = datacenter.datacenter_id;
        let servers = self.store.list_servers_by_datacenter(&datacenter_id)?;
        let plan = pools::plan(pool.pool_type, pool.desired_count, &servers);

        let mut report = ScaleReport::new(
            datacenter_id,
            pool.pool_type,
            pool.desired_count,
            plan.live,
        );
        report.deferred = plan.deferred;

        if plan.is_empty() {
            tracing::debug!(
                datacenter_id = %datacenter_id,
                pool_type = %pool.pool_type,
                desired = pool.desired_count,
                "Pool already at target"
            );
            return Ok(report);
        }

        let find = |server_id: &ServerId| servers.iter().find(|s| s.server_id == *server_id);

        for server_id in &plan.reuse {
            let Some(server) = find(server_id) else {
                continue;
            };
            let mut server = server.clone();
            lifecycle::validate_transition(&server.server_id, server.state, ServerState::Active)?;
            self.timers.cancel(server.server_id);
            server.state = ServerState::Active;
            server.drain_ts = None;
            self.store.put_server(&server)?;
            tracing::info!(server_id = %server.server_id, "Returned draining server to service");
            report.reused.push(server.server_id);
        }

        for _ in 0..plan.provision {
            match self.provision_server(datacenter, pool).await? {
                Ok(server) => report.provisioned.push(server.server_id),
                Err(failure) => report.provision_failures.push(failure),
            }
        }

        for server_id in &plan.drain {
            let Some(server) = find(server_id) else {
                continue;
            };
            let client = self.provider.as_ref();
            let provider = datacenter.provider;
            let provider_server_id = server.provider_server_id.as_str();
            let drained = self
                .retry
                .execute("drain", move || client.drain(provider, provider_server_id))
                .await;

            match drained {
                Ok(()) => {
                    let mut server = server.clone();
                    lifecycle::validate_transition(
                        &server.server_id,
                        server.state,
                        ServerState::Draining,
                    )?;
                    server.state = ServerState::Draining;
                    server.drain_ts = Some(Utc::now());
                    self.store.put_server(&server)?;
                    self.arm_drain_timer(&server, pool.drain_timeout_ms);
                    tracing::info!(
                        server_id = %server.server_id,
                        drain_timeout_ms = pool.drain_timeout_ms,
                        "Draining server"
                    );
                    report.drained.push(server.server_id);
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "Failed to drain server");
                    report.drain_failures.push(ServerFailure {
                        server_id: *server_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.is_noop() {
            self.watches.servers_changed(datacenter_id);
        }

        tracing::info!(
            datacenter_id = %datacenter_id,
            pool_type = %pool.pool_type,
            desired = pool.desired_count,
            live_before = plan.live,
            provisioned = report.provisioned.len(),
            provision_failures = report.provision_failures.len(),
            reused = report.reused.len(),
            drained = report.drained.len(),
            drain_failures = report.drain_failures.len(),
            deferred = report.deferred,
            "Reconciled pool"
        );
        Ok(report)
    }

    /// Create one server, trying the pool's hardware classes in order.
    ///
    /// The outer result carries storage failures; the inner one whether the
    /// provider produced an instance.
    async fn provision_server(
        &self,
        datacenter: &Datacenter,
        pool: &Pool,
    ) -> Result<std::result::Result<Server, ProvisionFailure>> {
        let server_id = ServerId::generate();
        let mut hardware_tried = Vec::with_capacity(pool.hardware.len());
        let mut last_error = format!("{} pool has no hardware", pool.pool_type);

        for hardware in &pool.hardware {
            let request = ProvisionRequest {
                server_id,
                datacenter_id: datacenter.datacenter_id,
                provider: datacenter.provider,
                provider_datacenter_id: datacenter.provider_datacenter_id.clone(),
                pool_type: pool.pool_type,
                provider_hardware: hardware.provider_hardware.clone(),
            };
            hardware_tried.push(request.provider_hardware.clone());

            let client = self.provider.as_ref();
            let request_ref = &request;
            let provisioned = self
                .retry
                .execute("provision", move || client.provision(request_ref))
                .await;

            match provisioned {
                Ok(instance) => {
                    let server = Server {
                        server_id,
                        datacenter_id: datacenter.datacenter_id,
                        pool_type: pool.pool_type,
                        public_ip: None,
                        state: ServerState::Provisioning,
                        healthy: true,
                        provider_server_id: instance.provider_server_id,
                        provider_hardware: request.provider_hardware,
                        create_ts: Utc::now(),
                        drain_ts: None,
                        terminate_ts: None,
                    };
                    self.store.put_server(&server)?;
                    tracing::info!(
                        server_id = %server_id,
                        datacenter_id = %datacenter.datacenter_id,
                        pool_type = %pool.pool_type,
                        hardware = %server.provider_hardware,
                        provider_server_id = %server.provider_server_id,
                        "Provisioning server"
                    );
                    return Ok(Ok(server));
                }
                Err(e) => {
                    tracing::warn!(
                        server_id = %server_id,
                        hardware = %request.provider_hardware,
                        error = %e,
                        "Provision failed, trying next hardware"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Ok(Err(ProvisionFailure {
            hardware_tried,
            error: last_error,
        }))
    }

    fn arm_drain_timer(self: &Arc<Self>, server: &Server, timeout_ms: u64) {
        let inner = Arc::clone(self);
        let server_id = server.server_id;
        let datacenter_id = server.datacenter_id;
        self.timers.arm(
            server_id,
            Duration::from_millis(timeout_ms),
            move |generation| async move {
                if let Err(e) = inner
                    .expire_drain(server_id, datacenter_id, generation)
                    .await
                {
                    tracing::error!(
                        server_id = %server_id,
                        error = %e,
                        "Failed to terminate server after drain timeout"
                    );
                }
            },
        );
    }

    async fn expire_drain(
        &self,
        server_id: ServerId,
        datacenter_id: DatacenterId,
        generation: u64,
    ) -> Result<()> {
        let _guard = self.locks.lock(LockKey::Datacenter(datacenter_id)).await;
        if !self.timers.claim(server_id, generation) {
            tracing::debug!(server_id = %server_id, "Drain timer was cancelled before expiry");
            return Ok(());
        }

        let Some(mut server) = self.store.get_server(&server_id)? else {
            return Ok(());
        };
        if server.state != ServerState::Draining {
            return Ok(());
        }
        let datacenter = self.datacenter(&datacenter_id)?;

        tracing::info!(server_id = %server_id, "Drain timeout reached");
        self.terminate_locked(datacenter.provider, &mut server).await?;
        self.watches.servers_changed(datacenter_id);
        Ok(())
    }

    /// Destroy a draining server's instance and mark it terminated.
    ///
    /// The record is terminated even if the provider keeps failing.
    async fn terminate_locked(&self, provider: Provider, server: &mut Server) -> Result<()> {
        lifecycle::validate_transition(&server.server_id, server.state, ServerState::Terminated)?;
        self.destroy_instance(provider, server).await;
        server.state = ServerState::Terminated;
        server.terminate_ts = Some(Utc::now());
        self.store.put_server(server)?;
        tracing::info!(server_id = %server.server_id, "Terminated server");
        Ok(())
    }

    async fn destroy_instance(&self, provider: Provider, server: &Server) -> bool {
        let client = self.provider.as_ref();
        let provider_server_id = server.provider_server_id.as_str();
        match self
            .retry
            .execute("destroy", move || client.destroy(provider, provider_server_id))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    server_id = %server.server_id,
                    provider_server_id = %server.provider_server_id,
                    error = %e,
                    "Failed to destroy instance"
                );
                false
            }
        }
    }

    fn live_servers(&self, datacenter_id: &DatacenterId) -> Result<usize> {
        Ok(pools::total_live(
            &self.store.list_servers_by_datacenter(datacenter_id)?,
        ))
    }

    /// Remove a datacenter with all its servers. The datacenter lock must be held.
    async fn teardown_datacenter(&self, datacenter: &Datacenter) -> Result<()> {
        let datacenter_id = datacenter.datacenter_id;
        let servers = self.store.list_servers_by_datacenter(&datacenter_id)?;
        for server in &servers {
            self.timers.cancel(server.server_id);
            if lifecycle::has_instance(server.state) {
                self.destroy_instance(datacenter.provider, server).await;
            }
            self.store.delete_server(&server.server_id)?;
        }
        self.store.delete_datacenter(&datacenter_id)?;

        self.watches.servers_changed(datacenter_id);
        self.watches
            .datacenter_changed(datacenter.cluster_id, datacenter_id, true);
        self.watches.forget_datacenter(datacenter_id);

        tracing::info!(
            datacenter_id = %datacenter_id,
            cluster_id = %datacenter.cluster_id,
            servers = servers.len(),
            "Deleted datacenter"
        );
        Ok(())
    }
}

#[async_trait]
impl<S: Store + 'static> ControlPlane for ControlPlaneService<S> {
    // =========================================================================
    // Cluster Registry
    // =========================================================================

    async fn create_cluster(
        &self,
        request: Captured<CreateClusterRequest>,
    ) -> Result<Captured<Cluster>> {
        let unknown = request.unknown_fields();
        let request = request.into_value();
        validate_name_id(&request.name_id)?;
        let inner = &self.inner;

        let _name = inner
            .locks
            .lock(LockKey::ClusterName(request.name_id.clone()))
            .await;
        if inner.store.get_cluster_by_name(&request.name_id)?.is_some() {
            return Err(ControlError::ClusterNameTaken(request.name_id));
        }

        let cluster = Captured::with_unknown(
            Cluster {
                cluster_id: ClusterId::generate(),
                name_id: request.name_id,
                create_ts: Utc::now(),
                owner_team_id: request.owner_team_id,
            },
            unknown,
        );
        inner.store.put_cluster(&cluster)?;
        inner.watches.cluster_changed();

        tracing::info!(
            cluster_id = %cluster.cluster_id,
            name_id = %cluster.name_id,
            "Created cluster"
        );
        Ok(cluster)
    }

    async fn get_cluster(&self, cluster_id: &ClusterId) -> Result<Captured<Cluster>> {
        self.inner.cluster(cluster_id)
    }

    async fn list_clusters(&self) -> Result<Vec<Captured<Cluster>>> {
        Ok(self.inner.store.list_clusters()?)
    }

    async fn resolve_cluster_name(&self, name_id: &str) -> Result<Captured<Cluster>> {
        self.inner
            .store
            .get_cluster_by_name(name_id)?
            .ok_or_else(|| ControlError::ClusterNameNotFound(name_id.to_string()))
    }

    async fn update_cluster(
        &self,
        cluster_id: &ClusterId,
        patch: Captured<ClusterPatch>,
    ) -> Result<Captured<Cluster>> {
        let inner = &self.inner;
        let unknown = patch.unknown_fields();
        let patch = patch.into_value();
        let new_name = match patch.name_id {
            Patch::Unset => None,
            Patch::Null => return Err(ControlError::validation("name_id cannot be null")),
            Patch::Value(name) => {
                validate_name_id(&name)?;
                Some(name)
            }
        };

        let _name = match &new_name {
            Some(name) => Some(inner.locks.lock(LockKey::ClusterName(name.clone())).await),
            None => None,
        };
        let _cluster = inner.locks.lock(LockKey::Cluster(*cluster_id)).await;
        let mut cluster = inner.cluster(cluster_id)?;

        if let Some(name) = new_name {
            if name != cluster.name_id {
                if inner.store.get_cluster_by_name(&name)?.is_some() {
                    return Err(ControlError::ClusterNameTaken(name));
                }
                cluster.name_id = name;
            }
        }
        cluster.owner_team_id = patch.owner_team_id.apply_to(cluster.owner_team_id);
        cluster.merge_unknown(unknown);

        inner.store.put_cluster(&cluster)?;
        inner.watches.cluster_changed();

        tracing::info!(
            cluster_id = %cluster_id,
            name_id = %cluster.name_id,
            "Updated cluster"
        );
        Ok(cluster)
    }

    async fn delete_cluster(&self, cluster_id: &ClusterId, force: bool) -> Result<()> {
        let inner = &self.inner;
        let _cluster = inner.locks.lock(LockKey::Cluster(*cluster_id)).await;
        let cluster = inner.cluster(cluster_id)?;

        let datacenters = inner.store.list_datacenters_by_cluster(cluster_id)?;
        let mut guards = Vec::with_capacity(datacenters.len());
        for datacenter in &datacenters {
            guards.push(
                inner
                    .locks
                    .lock(LockKey::Datacenter(datacenter.datacenter_id))
                    .await,
            );
        }

        let mut live = 0;
        for datacenter in &datacenters {
            live += inner.live_servers(&datacenter.datacenter_id)?;
        }
        if live > 0 && !force {
            return Err(ControlError::LiveServers { live });
        }

        for datacenter in &datacenters {
            inner.teardown_datacenter(datacenter).await?;
        }
        inner.store.delete_cluster(cluster_id)?;
        inner.watches.forget_cluster(*cluster_id);
        inner.watches.cluster_changed();

        tracing::info!(
            cluster_id = %cluster_id,
            name_id = %cluster.name_id,
            datacenters = datacenters.len(),
            live_servers = live,
            force,
            "Deleted cluster"
        );
        Ok(())
    }

    // =========================================================================
    // Datacenter Manager
    // =========================================================================

    async fn create_datacenter(
        &self,
        cluster_id: &ClusterId,
        request: Captured<CreateDatacenterRequest>,
    ) -> Result<Reconciled<Captured<Datacenter>>> {
        let inner = &self.inner;
        let unknown = request.unknown_fields();
        let request = request.into_value();
        validate_name_id(&request.name_id)?;
        if request.provider_datacenter_id.is_empty() {
            return Err(ControlError::validation(
                "provider_datacenter_id cannot be empty",
            ));
        }
        pools::validate_pools(&request.pools)?;

        let provider = request.provider;
        let region = request.provider_datacenter_id.clone();
        {
            let client = inner.provider.as_ref();
            let region = region.as_str();
            inner
                .retry
                .execute("resolve_region", move || {
                    client.resolve_region(provider, region)
                })
                .await?;
        }

        let _cluster = inner.locks.lock(LockKey::Cluster(*cluster_id)).await;
        inner.cluster(cluster_id)?;
        let _region = inner
            .locks
            .lock(LockKey::ProviderRegion(provider, region.clone()))
            .await;

        let siblings = inner.store.list_datacenters_by_cluster(cluster_id)?;
        if siblings.iter().any(|dc| dc.name_id == request.name_id) {
            return Err(ControlError::DatacenterNameTaken {
                cluster_id: *cluster_id,
                name_id: request.name_id,
            });
        }
        if let Some(existing) = inner.store.find_datacenter_by_provider(provider, &region)? {
            return Err(ControlError::ProviderRegionTaken {
                provider,
                region,
                cluster_id: existing.cluster_id,
            });
        }

        let datacenter = Captured::with_unknown(
            Datacenter {
                datacenter_id: DatacenterId::generate(),
                cluster_id: *cluster_id,
                name_id: request.name_id,
                display_name: request.display_name,
                provider,
                provider_datacenter_id: region,
                pools: request.pools,
                build_delivery_method: request.build_delivery_method,
                prebakes_enabled: request.prebakes_enabled,
                create_ts: Utc::now(),
            },
            unknown,
        );

        let _datacenter = inner
            .locks
            .lock(LockKey::Datacenter(datacenter.datacenter_id))
            .await;
        inner.store.put_datacenter(&datacenter)?;
        inner
            .watches
            .datacenter_changed(*cluster_id, datacenter.datacenter_id, true);

        tracing::info!(
            datacenter_id = %datacenter.datacenter_id,
            cluster_id = %cluster_id,
            name_id = %datacenter.name_id,
            provider = %provider,
            region = %datacenter.provider_datacenter_id,
            pools = datacenter.pools.len(),
            "Created datacenter"
        );

        let mut reports = Vec::new();
        for pool in datacenter.pools.iter().filter(|p| p.desired_count > 0) {
            reports.push(inner.reconcile_locked(&datacenter, pool).await?);
        }

        Ok(Reconciled {
            value: datacenter,
            reports,
        })
    }

    async fn get_datacenter(&self, datacenter_id: &DatacenterId) -> Result<Captured<Datacenter>> {
        self.inner.datacenter(datacenter_id)
    }

    async fn list_datacenters(
        &self,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Captured<Datacenter>>> {
        self.inner.cluster(cluster_id)?;
        Ok(self.inner.store.list_datacenters_by_cluster(cluster_id)?)
    }

    async fn list_pools(&self, datacenter_id: &DatacenterId) -> Result<Vec<Captured<Pool>>> {
        Ok(self.inner.datacenter(datacenter_id)?.into_value().pools)
    }

    async fn update_datacenter(
        &self,
        datacenter_id: &DatacenterId,
        patch: Captured<DatacenterPatch>,
    ) -> Result<Reconciled<Captured<Datacenter>>> {
        let inner = &self.inner;
        let unknown = patch.unknown_fields();
        let patch = patch.into_value();
        let _guard = inner.locks.lock(LockKey::Datacenter(*datacenter_id)).await;
        let mut datacenter = inner.datacenter(datacenter_id)?;

        let display_name = patch
            .display_name
            .apply_required(datacenter.display_name.clone())
            .map_err(|()| ControlError::validation("display_name cannot be null"))?;
        let build_delivery_method = patch
            .build_delivery_method
            .apply_required(datacenter.build_delivery_method)
            .map_err(|()| ControlError::validation("build_delivery_method cannot be null"))?;
        let prebakes_enabled = patch
            .prebakes_enabled
            .apply_required(datacenter.prebakes_enabled)
            .map_err(|()| ControlError::validation("prebakes_enabled cannot be null"))?;
        let pools = pools::apply_updates(&datacenter.pools, &patch.pools)?;

        datacenter.display_name = display_name;
        datacenter.build_delivery_method = build_delivery_method;
        datacenter.prebakes_enabled = prebakes_enabled;
        datacenter.pools = pools;
        datacenter.merge_unknown(unknown);

        inner.store.put_datacenter(&datacenter)?;
        inner.watches.datacenter_changed(
            datacenter.cluster_id,
            *datacenter_id,
            !patch.pools.is_empty(),
        );
        tracing::info!(
            datacenter_id = %datacenter_id,
            pool_updates = patch.pools.len(),
            "Updated datacenter"
        );

        let mut reports = Vec::with_capacity(patch.pools.len());
        for update in &patch.pools {
            if let Some(pool) = datacenter.pool(update.pool_type) {
                reports.push(inner.reconcile_locked(&datacenter, pool).await?);
            }
        }

        Ok(Reconciled {
            value: datacenter,
            reports,
        })
    }

    async fn delete_datacenter(&self, datacenter_id: &DatacenterId, force: bool) -> Result<()> {
        let inner = &self.inner;
        let cluster_id = inner.datacenter(datacenter_id)?.cluster_id;

        let _cluster = inner.locks.lock(LockKey::Cluster(cluster_id)).await;
        let _guard = inner.locks.lock(LockKey::Datacenter(*datacenter_id)).await;
        let datacenter = inner.datacenter(datacenter_id)?;

        let live = inner.live_servers(datacenter_id)?;
        if live > 0 && !force {
            return Err(ControlError::LiveServers { live });
        }
        inner.teardown_datacenter(&datacenter).await
    }

    // =========================================================================
    // Pool Controller
    // =========================================================================

    async fn update_pool(
        &self,
        datacenter_id: &DatacenterId,
        update: PoolUpdate,
    ) -> Result<Reconciled<Captured<Pool>>> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(LockKey::Datacenter(*datacenter_id)).await;
        let mut datacenter = inner.datacenter(datacenter_id)?;

        let pool_type = update.pool_type;
        datacenter.pools = pools::apply_updates(&datacenter.pools, slice::from_ref(&update))?;
        inner.store.put_datacenter(&datacenter)?;
        inner
            .watches
            .datacenter_changed(datacenter.cluster_id, *datacenter_id, true);

        let pool = datacenter
            .pool(pool_type)
            .cloned()
            .ok_or(ControlError::PoolNotFound {
                datacenter_id: *datacenter_id,
                pool_type,
            })?;
        tracing::info!(
            datacenter_id = %datacenter_id,
            pool_type = %pool_type,
            desired = pool.desired_count,
            min = pool.min_count,
            max = pool.max_count,
            "Updated pool"
        );

        let report = inner.reconcile_locked(&datacenter, &pool).await?;
        Ok(Reconciled {
            value: pool,
            reports: vec![report],
        })
    }

    async fn reconcile_pool(
        &self,
        datacenter_id: &DatacenterId,
        pool_type: PoolType,
    ) -> Result<ScaleReport> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(LockKey::Datacenter(*datacenter_id)).await;
        let datacenter = inner.datacenter(datacenter_id)?;
        let pool = datacenter
            .pool(pool_type)
            .ok_or(ControlError::PoolNotFound {
                datacenter_id: *datacenter_id,
                pool_type,
            })?;
        inner.reconcile_locked(&datacenter, pool).await
    }

    // =========================================================================
    // Server Inventory
    // =========================================================================

    async fn confirm_provisioned(
        &self,
        server_id: &ServerId,
        public_ip: IpAddr,
    ) -> Result<Reconciled<Server>> {
        let inner = &self.inner;
        let (_guard, mut server) = inner.lock_server(server_id).await?;

        // Draining servers may also become active, but only through reuse.
        if server.state != ServerState::Provisioning {
            return Err(ControlError::InvalidTransition {
                server_id: *server_id,
                from: server.state,
                to: ServerState::Active,
            });
        }
        server.state = ServerState::Active;
        server.public_ip = Some(public_ip);
        inner.store.put_server(&server)?;
        inner.watches.servers_changed(server.datacenter_id);
        tracing::info!(server_id = %server_id, public_ip = %public_ip, "Server active");

        let datacenter = inner.datacenter(&server.datacenter_id)?;
        let reports = match datacenter.pool(server.pool_type) {
            Some(pool) => vec![inner.reconcile_locked(&datacenter, pool).await?],
            None => Vec::new(),
        };

        Ok(Reconciled {
            value: inner.server(server_id)?,
            reports,
        })
    }

    async fn report_health(&self, server_id: &ServerId, healthy: bool) -> Result<Server> {
        let inner = &self.inner;
        let (_guard, mut server) = inner.lock_server(server_id).await?;
        if server.healthy != healthy {
            server.healthy = healthy;
            inner.store.put_server(&server)?;
            inner.watches.servers_changed(server.datacenter_id);
            tracing::info!(server_id = %server_id, healthy, "Server health changed");
        }
        Ok(server)
    }

    async fn confirm_drained(&self, server_id: &ServerId) -> Result<Server> {
        let inner = &self.inner;
        let (_guard, mut server) = inner.lock_server(server_id).await?;
        lifecycle::validate_transition(server_id, server.state, ServerState::Terminated)?;

        inner.timers.cancel(*server_id);
        let datacenter = inner.datacenter(&server.datacenter_id)?;
        inner
            .terminate_locked(datacenter.provider, &mut server)
            .await?;
        inner.watches.servers_changed(server.datacenter_id);
        Ok(server)
    }

    async fn get_server(&self, server_id: &ServerId) -> Result<Server> {
        self.inner.server(server_id)
    }

    async fn list_servers(&self, datacenter_id: &DatacenterId) -> Result<Vec<Server>> {
        self.inner.datacenter(datacenter_id)?;
        Ok(self.inner.store.list_servers_by_datacenter(datacenter_id)?)
    }

    async fn purge_terminated(&self) -> Result<usize> {
        let inner = &self.inner;
        let retention = chrono::Duration::from_std(inner.config.terminated_retention)
            .map_err(|e| ControlError::Internal(e.to_string()))?;
        let cutoff = Utc::now() - retention;

        let mut purged = 0;
        for server in inner.store.list_servers_by_state(ServerState::Terminated)? {
            if !server.terminate_ts.is_some_and(|ts| ts <= cutoff) {
                continue;
            }
            let _guard = inner
                .locks
                .lock(LockKey::Datacenter(server.datacenter_id))
                .await;
            match inner.store.delete_server(&server.server_id) {
                Ok(()) => {
                    inner.watches.servers_changed(server.datacenter_id);
                    purged += 1;
                }
                // Removed together with its datacenter in the meantime.
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        inner.locks.prune();

        if purged > 0 {
            tracing::info!(purged, "Purged terminated servers");
        }
        Ok(purged)
    }

    // =========================================================================
    // Watches
    // =========================================================================

    async fn watch_clusters(
        &self,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Cluster>>>> {
        let index = self.inner.wait(Collection::Clusters, since).await;
        Ok(Watched {
            value: self.inner.store.list_clusters()?,
            index,
        })
    }

    async fn watch_datacenters(
        &self,
        cluster_id: &ClusterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Datacenter>>>> {
        self.inner.cluster(cluster_id)?;
        let index = self
            .inner
            .wait(Collection::Datacenters(*cluster_id), since)
            .await;
        Ok(Watched {
            value: self.inner.store.list_datacenters_by_cluster(cluster_id)?,
            index,
        })
    }

    async fn watch_pools(
        &self,
        datacenter_id: &DatacenterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Captured<Pool>>>> {
        self.inner.datacenter(datacenter_id)?;
        let index = self
            .inner
            .wait(Collection::Pools(*datacenter_id), since)
            .await;
        Ok(Watched {
            value: self.inner.datacenter(datacenter_id)?.into_value().pools,
            index,
        })
    }

    async fn watch_servers(
        &self,
        datacenter_id: &DatacenterId,
        since: Option<WatchIndex>,
    ) -> Result<Watched<Vec<Server>>> {
        self.inner.datacenter(datacenter_id)?;
        let index = self
            .inner
            .wait(Collection::Servers(*datacenter_id), since)
            .await;
        Ok(Watched {
            value: self.inner.store.list_servers_by_datacenter(datacenter_id)?,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::retry::RetryConfig;
    use crate::types::PoolPatch;
    use fleetplane_core::{BuildDeliveryMethod, ErrorKind, Hardware, TeamId};
    use fleetplane_store::MemoryStore;
    use std::net::Ipv4Addr;

    const DRAIN_TIMEOUT_MS: u64 = 60_000;

    fn setup() -> (ControlPlaneService<MemoryStore>, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new());
        let config = ControlConfig {
            watch_timeout: Duration::from_secs(5),
            retry: RetryConfig::none(),
            ..ControlConfig::default()
        };
        let service =
            ControlPlaneService::new(Arc::new(MemoryStore::new()), provider.clone(), config);
        (service, provider)
    }

    fn job_pool(min: u32, desired: u32, max: u32, hardware: &[&str]) -> Captured<Pool> {
        Captured::new(Pool {
            pool_type: PoolType::Job,
            hardware: hardware.iter().map(|h| Hardware::new(*h).into()).collect(),
            desired_count: desired,
            min_count: min,
            max_count: max,
            drain_timeout_ms: DRAIN_TIMEOUT_MS,
        })
    }

    fn datacenter_request(
        name_id: &str,
        region: &str,
        pools: Vec<Captured<Pool>>,
    ) -> Captured<CreateDatacenterRequest> {
        Captured::new(CreateDatacenterRequest {
            name_id: name_id.to_string(),
            display_name: name_id.to_uppercase(),
            provider: Provider::Linode,
            provider_datacenter_id: region.to_string(),
            pools,
            build_delivery_method: BuildDeliveryMethod::TrafficServer,
            prebakes_enabled: false,
        })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    /// A cluster with one datacenter whose job pool has `desired` active servers.
    async fn running_pool(
        service: &ControlPlaneService<MemoryStore>,
        min: u32,
        desired: u32,
        max: u32,
    ) -> (Captured<Datacenter>, Vec<ServerId>) {
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        let created = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request(
                    "us-east",
                    "us-east",
                    vec![job_pool(min, desired, max, &["g6-standard-2"])],
                ),
            )
            .await
            .unwrap();
        let ids = created.reports[0].provisioned.clone();
        for (n, id) in ids.iter().enumerate() {
            let n = u8::try_from(n).unwrap();
            service.confirm_provisioned(id, ip(n + 1)).await.unwrap();
        }
        (created.value, ids)
    }

    async fn state_of(service: &ControlPlaneService<MemoryStore>, id: &ServerId) -> ServerState {
        service.get_server(id).await.unwrap().state
    }

    #[tokio::test]
    async fn cluster_crud() {
        let (service, _provider) = setup();

        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        assert_eq!(cluster.name_id, "prod");
        assert!(cluster.owner_team_id.is_none());

        let dup = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap_err();
        assert!(matches!(dup, ControlError::ClusterNameTaken(_)));
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let bad = service
            .create_cluster(CreateClusterRequest::new("Prod_1").into())
            .await
            .unwrap_err();
        assert_eq!(bad.kind(), ErrorKind::Validation);

        let resolved = service.resolve_cluster_name("prod").await.unwrap();
        assert_eq!(resolved.cluster_id, cluster.cluster_id);
        assert!(matches!(
            service.resolve_cluster_name("nope").await,
            Err(ControlError::ClusterNameNotFound(_))
        ));

        let team = TeamId::generate();
        let updated = service
            .update_cluster(
                &cluster.cluster_id,
                ClusterPatch {
                    name_id: Patch::Value("production".to_string()),
                    owner_team_id: Patch::Value(team),
                }
                .into(),
            )
            .await
            .unwrap();
        assert_eq!(updated.name_id, "production");
        assert_eq!(updated.owner_team_id, Some(team));
        assert!(service.resolve_cluster_name("prod").await.is_err());

        let cleared = service
            .update_cluster(
                &cluster.cluster_id,
                ClusterPatch {
                    owner_team_id: Patch::Null,
                    ..ClusterPatch::default()
                }
                .into(),
            )
            .await
            .unwrap();
        assert_eq!(cleared.name_id, "production");
        assert!(cleared.owner_team_id.is_none());

        service
            .create_cluster(CreateClusterRequest::new("staging").into())
            .await
            .unwrap();
        let taken = service
            .update_cluster(
                &cluster.cluster_id,
                ClusterPatch {
                    name_id: Patch::Value("staging".to_string()),
                    ..ClusterPatch::default()
                }
                .into(),
            )
            .await
            .unwrap_err();
        assert!(matches!(taken, ControlError::ClusterNameTaken(_)));
        assert_eq!(service.list_clusters().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_datacenter_provisions_to_target() {
        let (service, provider) = setup();
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();

        let created = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("us-east", "us-east", vec![job_pool(0, 2, 4, &["g6"])]),
            )
            .await
            .unwrap();

        assert_eq!(created.reports.len(), 1);
        assert_eq!(created.reports[0].provisioned.len(), 2);
        assert_eq!(provider.provision_calls(), 2);

        let servers = service
            .list_servers(&created.value.datacenter_id)
            .await
            .unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers
            .iter()
            .all(|s| s.state == ServerState::Provisioning && s.public_ip.is_none()));

        let listed = service.list_datacenters(&cluster.cluster_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            service
                .list_pools(&created.value.datacenter_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn provisioning_fails_over_across_hardware() {
        let (service, provider) = setup();
        provider.break_hardware("g6-dedicated");
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();

        let created = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request(
                    "us-east",
                    "us-east",
                    vec![job_pool(0, 1, 2, &["g6-dedicated", "g6-standard"])],
                ),
            )
            .await
            .unwrap();
        let server_id = created.reports[0].provisioned[0];
        let server = service.get_server(&server_id).await.unwrap();
        assert_eq!(server.provider_hardware, "g6-standard");

        provider.break_hardware("g6-standard");
        let report = service
            .update_pool(
                &created.value.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(2),
                },
            )
            .await
            .unwrap()
            .reports
            .remove(0);
        assert!(report.provisioned.is_empty());
        assert_eq!(report.provision_failures.len(), 1);
        assert_eq!(
            report.provision_failures[0].hardware_tried,
            vec!["g6-dedicated".to_string(), "g6-standard".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_region_is_a_validation_error() {
        let (service, provider) = setup();
        provider.reject_region("mars-1");
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();

        let err = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("mars", "mars-1", Vec::new()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(service
            .list_datacenters(&cluster.cluster_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn provider_region_belongs_to_one_cluster() {
        let (service, _provider) = setup();
        let prod = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        let staging = service
            .create_cluster(CreateClusterRequest::new("staging").into())
            .await
            .unwrap();

        service
            .create_datacenter(
                &prod.cluster_id,
                datacenter_request("east", "us-east", Vec::new()),
            )
            .await
            .unwrap();
        let err = service
            .create_datacenter(
                &staging.cluster_id,
                datacenter_request("east", "us-east", Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::ProviderRegionTaken { cluster_id, .. } if cluster_id == prod.cluster_id
        ));

        let dup_name = service
            .create_datacenter(
                &prod.cluster_id,
                datacenter_request("east", "us-west", Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(dup_name, ControlError::DatacenterNameTaken { .. }));

        let same_cluster = service
            .create_datacenter(
                &prod.cluster_id,
                datacenter_request("east-2", "us-east", Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            same_cluster,
            ControlError::ProviderRegionTaken { cluster_id, .. } if cluster_id == prod.cluster_id
        ));
    }

    #[tokio::test]
    async fn invalid_pool_update_leaves_pool_unchanged() {
        let (service, provider) = setup();
        let (datacenter, _ids) = running_pool(&service, 1, 3, 5).await;
        provider.clear_calls();

        let err = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(9),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let pools = service.list_pools(&datacenter.datacenter_id).await.unwrap();
        assert_eq!(pools[0].desired_count, 3);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn unchanged_target_takes_no_action() {
        let (service, provider) = setup();
        let (datacenter, _ids) = running_pool(&service, 1, 3, 5).await;
        provider.clear_calls();

        let updated = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(3),
                },
            )
            .await
            .unwrap();
        assert!(updated.reports[0].is_noop());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn scale_down_drains_unhealthy_then_oldest() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 1, 3, 5).await;

        // Two servers of the same age, and a newer unhealthy one.
        let old = Utc::now() - chrono::Duration::minutes(30);
        for id in &ids[..2] {
            let mut server = service.get_server(id).await.unwrap();
            server.create_ts = old;
            service.store().put_server(&server).unwrap();
        }
        service.report_health(&ids[2], false).await.unwrap();

        let updated = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(1),
                },
            )
            .await
            .unwrap();

        let report = &updated.reports[0];
        let lower_id = ids[0].min(ids[1]);
        assert_eq!(report.drained, vec![ids[2], lower_id]);
        assert_eq!(report.live_before, 3);
        assert_eq!(provider.drained().len(), 2);
        assert_eq!(service.pending_drains(), 2);

        assert_eq!(state_of(&service, &ids[2]).await, ServerState::Draining);
        assert_eq!(state_of(&service, &lower_id).await, ServerState::Draining);
        let kept = if lower_id == ids[0] { ids[1] } else { ids[0] };
        assert_eq!(state_of(&service, &kept).await, ServerState::Active);
    }

    #[tokio::test]
    async fn provisioning_servers_defer_scale_down() {
        let (service, _provider) = setup();
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        let created = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("east", "us-east", vec![job_pool(0, 2, 2, &["g6"])]),
            )
            .await
            .unwrap();
        let datacenter_id = created.value.datacenter_id;
        let ids = created.reports[0].provisioned.clone();
        service.confirm_provisioned(&ids[0], ip(1)).await.unwrap();

        let report = service
            .update_pool(
                &datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(0),
                },
            )
            .await
            .unwrap()
            .reports
            .remove(0);
        assert_eq!(report.drained, vec![ids[0]]);
        assert_eq!(report.deferred, 1);

        // Once active, the deferred server is drained too.
        let confirmed = service.confirm_provisioned(&ids[1], ip(2)).await.unwrap();
        assert_eq!(confirmed.reports[0].drained, vec![ids[1]]);
        assert_eq!(confirmed.value.state, ServerState::Draining);
        assert_eq!(confirmed.value.public_ip, Some(ip(2)));
    }

    #[tokio::test]
    async fn scale_up_reuses_draining_servers() {
        let (service, provider) = setup();
        let (datacenter, _ids) = running_pool(&service, 0, 2, 4).await;

        let down = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(1),
                },
            )
            .await
            .unwrap();
        let drained = down.reports[0].drained[0];
        assert_eq!(service.pending_drains(), 1);
        provider.clear_calls();

        let up = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(up.reports[0].reused, vec![drained]);
        assert!(up.reports[0].provisioned.is_empty());
        assert_eq!(provider.provision_calls(), 0);
        assert_eq!(service.pending_drains(), 0);

        let server = service.get_server(&drained).await.unwrap();
        assert_eq!(server.state, ServerState::Active);
        assert!(server.drain_ts.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_terminates_and_destroys() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 2, 2).await;

        service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(0),
                },
            )
            .await
            .unwrap();
        assert_eq!(service.pending_drains(), 2);

        tokio::time::sleep(Duration::from_millis(DRAIN_TIMEOUT_MS - 1_000)).await;
        assert_eq!(state_of(&service, &ids[0]).await, ServerState::Draining);

        tokio::time::sleep(Duration::from_secs(2)).await;
        for id in &ids {
            let server = service.get_server(id).await.unwrap();
            assert_eq!(server.state, ServerState::Terminated);
            assert!(server.terminate_ts.is_some());
        }
        assert_eq!(provider.destroyed().len(), 2);
        assert_eq!(service.pending_drains(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_drained_wins_over_timer() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 1, 1).await;
        service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(0),
                },
            )
            .await
            .unwrap();

        let server = service.confirm_drained(&ids[0]).await.unwrap();
        assert_eq!(server.state, ServerState::Terminated);
        assert_eq!(service.pending_drains(), 0);

        tokio::time::sleep(Duration::from_millis(DRAIN_TIMEOUT_MS * 2)).await;
        assert_eq!(provider.destroyed().len(), 1);

        let again = service.confirm_drained(&ids[0]).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn invalid_server_transitions_conflict() {
        let (service, _provider) = setup();
        let (_datacenter, ids) = running_pool(&service, 0, 1, 1).await;

        let err = service.confirm_provisioned(&ids[0], ip(9)).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::InvalidTransition {
                from: ServerState::Active,
                to: ServerState::Active,
                ..
            }
        ));
        let err = service.confirm_drained(&ids[0]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let missing = service.get_server(&ServerId::generate()).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_cluster_with_live_servers_requires_force() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 2, 2).await;
        let cluster_id = datacenter.cluster_id;

        let err = service.delete_cluster(&cluster_id, false).await.unwrap_err();
        assert!(matches!(err, ControlError::LiveServers { live: 2 }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(service.get_cluster(&cluster_id).await.is_ok());

        service.delete_cluster(&cluster_id, true).await.unwrap();
        assert_eq!(provider.destroyed().len(), 2);
        assert!(matches!(
            service.get_cluster(&cluster_id).await,
            Err(ControlError::ClusterNotFound(_))
        ));
        assert!(service
            .get_datacenter(&datacenter.datacenter_id)
            .await
            .is_err());
        for id in &ids {
            assert!(service.get_server(id).await.is_err());
        }
    }

    #[tokio::test]
    async fn delete_empty_datacenter() {
        let (service, _provider) = setup();
        let cluster = service
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        let created = service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("east", "us-east", vec![job_pool(0, 0, 2, &[])]),
            )
            .await
            .unwrap();
        assert!(created.reports.is_empty());

        service
            .delete_datacenter(&created.value.datacenter_id, false)
            .await
            .unwrap();
        assert!(service
            .list_datacenters(&cluster.cluster_id)
            .await
            .unwrap()
            .is_empty());

        // The region is free again.
        service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("east", "us-east", Vec::new()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_datacenter_is_all_or_nothing() {
        let (service, _provider) = setup();
        let (datacenter, _ids) = running_pool(&service, 0, 1, 2).await;

        let patch: Captured<DatacenterPatch> = serde_json::from_value(serde_json::json!({
            "display_name": "US East (new)",
            "pools": [
                {"pool_type": "job", "max_count": 3},
                {"pool_type": "gg", "desired_count": 1}
            ]
        }))
        .unwrap();
        let err = service
            .update_datacenter(&datacenter.datacenter_id, patch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let unchanged = service
            .get_datacenter(&datacenter.datacenter_id)
            .await
            .unwrap();
        assert_eq!(unchanged.display_name, datacenter.display_name);
        assert_eq!(unchanged.pools.len(), 1);
        assert_eq!(unchanged.pools[0].max_count, 2);

        let patch: Captured<DatacenterPatch> = serde_json::from_value(serde_json::json!({
            "display_name": "US East (new)",
            "prebakes_enabled": true,
            "pools": [{"pool_type": "job", "max_count": 3, "desired_count": 2}]
        }))
        .unwrap();
        let updated = service
            .update_datacenter(&datacenter.datacenter_id, patch)
            .await
            .unwrap();
        assert_eq!(updated.value.display_name, "US East (new)");
        assert!(updated.value.prebakes_enabled);
        assert_eq!(updated.reports[0].provisioned.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cluster_watch_advances_on_datacenter_change() {
        let (service, _provider) = setup();
        let mut last = None;
        for name in ["a", "b", "c", "d", "e"] {
            last = Some(
                service
                    .create_cluster(CreateClusterRequest::new(name).into())
                    .await
                    .unwrap(),
            );
        }
        let cluster = last.unwrap();
        let current = service.watch_clusters(None).await.unwrap();
        assert_eq!(current.index, WatchIndex(5));

        let watcher = {
            let service = service.clone();
            tokio::spawn(async move { service.watch_clusters(Some(WatchIndex(5))).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        service
            .create_datacenter(
                &cluster.cluster_id,
                datacenter_request("east", "us-east", Vec::new()),
            )
            .await
            .unwrap();
        let woke = watcher.await.unwrap().unwrap();
        assert_eq!(woke.index, WatchIndex(6));
        assert_eq!(woke.value.len(), 5);

        let timed_out = service.watch_clusters(Some(WatchIndex(6))).await.unwrap();
        assert_eq!(timed_out.index, WatchIndex(6));
    }

    #[tokio::test]
    async fn server_and_pool_watches_are_scoped() {
        let (service, _provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 1, 2).await;
        let datacenter_id = datacenter.datacenter_id;

        let servers = service.watch_servers(&datacenter_id, None).await.unwrap();
        let pools = service.watch_pools(&datacenter_id, None).await.unwrap();
        let datacenters = service
            .watch_datacenters(&datacenter.cluster_id, None)
            .await
            .unwrap();

        service.report_health(&ids[0], false).await.unwrap();

        let after = service
            .watch_servers(&datacenter_id, Some(servers.index))
            .await
            .unwrap();
        assert_eq!(after.index, WatchIndex(servers.index.0 + 1));
        assert!(!after.value[0].healthy);

        assert_eq!(
            service.watch_pools(&datacenter_id, None).await.unwrap().index,
            pools.index
        );
        assert_eq!(
            service
                .watch_datacenters(&datacenter.cluster_id, None)
                .await
                .unwrap()
                .index,
            datacenters.index
        );
    }

    #[tokio::test]
    async fn state_survives_reopening_the_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let datacenter_id = {
            let store = Arc::new(fleetplane_store::RocksStore::open(dir.path()).unwrap());
            let service = ControlPlaneService::with_defaults(store, Arc::new(MockProvider::new()));
            let cluster = service
                .create_cluster(CreateClusterRequest::new("prod").into())
                .await
                .unwrap();
            service
                .create_datacenter(
                    &cluster.cluster_id,
                    datacenter_request("east", "us-east", vec![job_pool(0, 1, 1, &["g6"])]),
                )
                .await
                .unwrap()
                .value
                .datacenter_id
        };

        let store = Arc::new(fleetplane_store::RocksStore::open(dir.path()).unwrap());
        let service = ControlPlaneService::with_defaults(store, Arc::new(MockProvider::new()));
        let cluster = service.resolve_cluster_name("prod").await.unwrap();
        let datacenters = service.list_datacenters(&cluster.cluster_id).await.unwrap();
        assert_eq!(datacenters[0].datacenter_id, datacenter_id);
        assert_eq!(service.list_servers(&datacenter_id).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_old_terminated_servers() {
        let provider = Arc::new(MockProvider::new());
        let config = ControlConfig {
            retry: RetryConfig::none(),
            terminated_retention: Duration::ZERO,
            ..ControlConfig::default()
        };
        let service =
            ControlPlaneService::new(Arc::new(MemoryStore::new()), provider, config);
        let (datacenter, ids) = running_pool(&service, 0, 2, 2).await;

        service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(service.purge_terminated().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(DRAIN_TIMEOUT_MS + 1_000)).await;
        assert_eq!(service.purge_terminated().await.unwrap(), 1);
        let remaining = service.list_servers(&datacenter.datacenter_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(ids.contains(&remaining[0].server_id));
    }

    #[tokio::test]
    async fn failed_drains_are_reported_per_server() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 3, 3).await;

        // Oldest first: ids[0], then ids[1] are picked for draining.
        for (id, minutes) in ids.iter().zip([30, 20, 0]) {
            let mut server = service.get_server(id).await.unwrap();
            server.create_ts = Utc::now() - chrono::Duration::minutes(minutes);
            service.store().put_server(&server).unwrap();
        }
        let stuck = service.get_server(&ids[0]).await.unwrap();
        provider.fail_drain(stuck.provider_server_id.clone());

        let report = service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(1),
                },
            )
            .await
            .unwrap()
            .reports
            .remove(0);
        assert_eq!(report.drained, vec![ids[1]]);
        assert_eq!(report.drain_failures.len(), 1);
        assert_eq!(report.drain_failures[0].server_id, ids[0]);
        assert!(!report.drain_failures[0].error.is_empty());

        assert_eq!(state_of(&service, &ids[0]).await, ServerState::Active);
        assert_eq!(state_of(&service, &ids[1]).await, ServerState::Draining);
        assert_eq!(state_of(&service, &ids[2]).await, ServerState::Active);
        assert_eq!(service.pending_drains(), 1);

        // The next pass retries the server that is still over target.
        let retried = service
            .reconcile_pool(&datacenter.datacenter_id, PoolType::Job)
            .await
            .unwrap();
        assert!(retried.drained.is_empty());
        assert_eq!(retried.drain_failures[0].server_id, ids[0]);
    }

    #[tokio::test]
    async fn destroy_failure_still_terminates_record() {
        let (service, provider) = setup();
        let (datacenter, ids) = running_pool(&service, 0, 1, 1).await;
        service
            .update_pool(
                &datacenter.datacenter_id,
                PoolUpdate {
                    pool_type: PoolType::Job,
                    patch: PoolPatch::desired(0),
                },
            )
            .await
            .unwrap();

        provider.fail_next_destroys(1);
        let server = service.confirm_drained(&ids[0]).await.unwrap();
        assert_eq!(server.state, ServerState::Terminated);
        assert!(server.terminate_ts.is_some());
        assert_eq!(provider.destroyed().len(), 1);
        assert_eq!(state_of(&service, &ids[0]).await, ServerState::Terminated);
        assert_eq!(service.pending_drains(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timers_are_recovered_on_startup() {
        let store = Arc::new(MemoryStore::new());
        let cluster = Captured::new(Cluster {
            cluster_id: ClusterId::generate(),
            name_id: "prod".to_string(),
            create_ts: Utc::now(),
            owner_team_id: None,
        });
        store.put_cluster(&cluster).unwrap();
        let datacenter = Captured::new(Datacenter {
            datacenter_id: DatacenterId::generate(),
            cluster_id: cluster.cluster_id,
            name_id: "east".to_string(),
            display_name: "East".to_string(),
            provider: Provider::Linode,
            provider_datacenter_id: "us-east".to_string(),
            pools: vec![job_pool(0, 0, 2, &["g6"])],
            build_delivery_method: BuildDeliveryMethod::TrafficServer,
            prebakes_enabled: false,
            create_ts: Utc::now(),
        });
        store.put_datacenter(&datacenter).unwrap();

        let draining = |provider_server_id: &str, drain_ts| Server {
            server_id: ServerId::generate(),
            datacenter_id: datacenter.datacenter_id,
            pool_type: PoolType::Job,
            public_ip: Some(ip(1)),
            state: ServerState::Draining,
            healthy: true,
            provider_server_id: provider_server_id.to_string(),
            provider_hardware: "g6".to_string(),
            create_ts: Utc::now() - chrono::Duration::hours(2),
            drain_ts: Some(drain_ts),
            terminate_ts: None,
        };
        let overdue = draining("lin-1", Utc::now() - chrono::Duration::hours(1));
        let fresh = draining("lin-2", Utc::now());
        store.put_server(&overdue).unwrap();
        store.put_server(&fresh).unwrap();

        let provider = Arc::new(MockProvider::new());
        let config = ControlConfig {
            retry: RetryConfig::none(),
            ..ControlConfig::default()
        };
        let service = ControlPlaneService::new(store, provider.clone(), config);
        assert_eq!(service.pending_drains(), 0);

        assert_eq!(service.recover_drains().await.unwrap(), 2);
        assert_eq!(service.pending_drains(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state_of(&service, &overdue.server_id).await, ServerState::Terminated);
        assert_eq!(state_of(&service, &fresh.server_id).await, ServerState::Draining);
        assert_eq!(provider.destroyed(), vec!["lin-1".to_string()]);

        tokio::time::sleep(Duration::from_millis(DRAIN_TIMEOUT_MS)).await;
        assert_eq!(state_of(&service, &fresh.server_id).await, ServerState::Terminated);
        assert_eq!(service.pending_drains(), 0);
    }
}
