//! Request and response types for control plane operations.
//!
//! Update requests use [`Patch`] fields so that absent keys, explicit `null`
//! and new values stay distinguishable all the way from the wire.

use std::time::Duration;

use fleetplane_core::{
    BuildDeliveryMethod, Captured, DatacenterId, Hardware, Patch, Pool, PoolType, Provider,
    ServerId, TeamId, WatchIndex, WireFields,
};
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Request to create a new cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    /// Unique human readable name.
    pub name_id: String,
    /// Team that will own the cluster.
    #[serde(default)]
    pub owner_team_id: Option<TeamId>,
}

impl CreateClusterRequest {
    /// Create a request for an unowned cluster.
    #[must_use]
    pub fn new(name_id: impl Into<String>) -> Self {
        Self {
            name_id: name_id.into(),
            owner_team_id: None,
        }
    }
}

impl WireFields for CreateClusterRequest {
    const FIELDS: &'static [&'static str] = &["name_id", "owner_team_id"];
}

/// Partial update of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterPatch {
    /// New name. Cannot be `null`.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub name_id: Patch<String>,
    /// New owner, or `null` to clear ownership.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub owner_team_id: Patch<TeamId>,
}

impl WireFields for ClusterPatch {
    const FIELDS: &'static [&'static str] = &["name_id", "owner_team_id"];
}

/// Request to create a datacenter in a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatacenterRequest {
    /// Human readable name, unique within the cluster.
    pub name_id: String,
    /// Name shown in dashboards.
    pub display_name: String,
    /// Cloud provider.
    pub provider: Provider,
    /// Provider region.
    pub provider_datacenter_id: String,
    /// Initial pools.
    #[serde(default)]
    pub pools: Vec<Captured<Pool>>,
    /// How build artifacts are delivered.
    pub build_delivery_method: BuildDeliveryMethod,
    /// Whether prebaked images are used.
    #[serde(default)]
    pub prebakes_enabled: bool,
}

impl WireFields for CreateDatacenterRequest {
    const FIELDS: &'static [&'static str] = &[
        "name_id",
        "display_name",
        "provider",
        "provider_datacenter_id",
        "pools",
        "build_delivery_method",
        "prebakes_enabled",
    ];
}

/// Partial update of a pool's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolPatch {
    /// New hardware classes, or `null` to clear them.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub hardware: Patch<Vec<Captured<Hardware>>>,
    /// New target count.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub desired_count: Patch<u32>,
    /// New lower bound.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub min_count: Patch<u32>,
    /// New upper bound.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub max_count: Patch<u32>,
    /// New drain timeout.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub drain_timeout_ms: Patch<u64>,
}

impl PoolPatch {
    /// A patch that only moves the target count.
    #[must_use]
    pub fn desired(count: u32) -> Self {
        Self {
            desired_count: Patch::Value(count),
            ..Self::default()
        }
    }
}

/// Partial update of one pool, addressed by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolUpdate {
    /// Pool to update. Missing pools are created empty first.
    pub pool_type: PoolType,
    /// Field changes.
    #[serde(flatten)]
    pub patch: PoolPatch,
}

/// Partial update of a datacenter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatacenterPatch {
    /// New display name. Cannot be `null`.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub display_name: Patch<String>,
    /// New delivery method. Cannot be `null`.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub build_delivery_method: Patch<BuildDeliveryMethod>,
    /// New prebake flag. Cannot be `null`.
    #[serde(default, skip_serializing_if = "Patch::is_unset")]
    pub prebakes_enabled: Patch<bool>,
    /// Pool changes, applied together.
    #[serde(default)]
    pub pools: Vec<PoolUpdate>,
}

impl WireFields for DatacenterPatch {
    const FIELDS: &'static [&'static str] = &[
        "display_name",
        "build_delivery_method",
        "prebakes_enabled",
        "pools",
    ];
}

/// A value read together with the version of its collection.
///
/// The index is read before the value, so a change racing with the read is
/// reported on the next watch rather than lost.
#[derive(Debug, Clone, PartialEq)]
pub struct Watched<T> {
    /// Snapshot of the collection.
    pub value: T,
    /// Version the snapshot is at least as new as.
    pub index: WatchIndex,
}

/// The result of a mutation that triggered reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    /// The entity after the mutation.
    pub value: T,
    /// One report per reconciled pool.
    pub reports: Vec<ScaleReport>,
}

/// A provision attempt that failed on every hardware class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionFailure {
    /// Hardware classes tried, in order.
    pub hardware_tried: Vec<String>,
    /// The last error reported.
    pub error: String,
}

/// A per-server step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFailure {
    /// The affected server.
    pub server_id: ServerId,
    /// What went wrong.
    pub error: String,
}

/// Outcome of reconciling one pool.
///
/// Individual failures are recorded here instead of failing the
/// reconciliation as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleReport {
    /// Datacenter of the pool.
    pub datacenter_id: DatacenterId,
    /// The reconciled pool.
    pub pool_type: PoolType,
    /// Target at reconciliation time.
    pub desired_count: u32,
    /// Live servers before any action.
    pub live_before: u32,
    /// New servers created.
    pub provisioned: Vec<ServerId>,
    /// New servers that could not be created.
    pub provision_failures: Vec<ProvisionFailure>,
    /// Draining servers returned to service.
    pub reused: Vec<ServerId>,
    /// Servers that started draining.
    pub drained: Vec<ServerId>,
    /// Servers the provider refused to drain.
    pub drain_failures: Vec<ServerFailure>,
    /// Excess servers left running because they are still provisioning.
    pub deferred: u32,
}

impl ScaleReport {
    /// An empty report.
    #[must_use]
    pub const fn new(
        datacenter_id: DatacenterId,
        pool_type: PoolType,
        desired_count: u32,
        live_before: u32,
    ) -> Self {
        Self {
            datacenter_id,
            pool_type,
            desired_count,
            live_before,
            provisioned: Vec::new(),
            provision_failures: Vec::new(),
            reused: Vec::new(),
            drained: Vec::new(),
            drain_failures: Vec::new(),
            deferred: 0,
        }
    }

    /// Returns true if reconciliation attempted nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.provisioned.is_empty()
            && self.provision_failures.is_empty()
            && self.reused.is_empty()
            && self.drained.is_empty()
            && self.drain_failures.is_empty()
            && self.deferred == 0
    }
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Longest time a watch waits for a change.
    pub watch_timeout: Duration,
    /// How long terminated servers are kept for audit.
    pub terminated_retention: Duration,
    /// How often terminated servers are purged.
    pub purge_interval: Duration,
    /// Retry policy for provider calls.
    pub retry: RetryConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            watch_timeout: Duration::from_secs(30),
            terminated_retention: Duration::from_secs(24 * 60 * 60), // 1 day
            purge_interval: Duration::from_secs(5 * 60),
            retry: RetryConfig::default(),
        }
    }
}
