//! Wire entities of the fleet hierarchy.
//!
//! Clusters contain datacenters, datacenters contain pools. Servers are kept
//! in a separate inventory and point at their datacenter and pool type by id.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{BuildDeliveryMethod, PoolType, Provider, ServerState};
use crate::error::{CoreError, Result};
use crate::ids::{ClusterId, DatacenterId, ServerId, TeamId};
use crate::wire::{Captured, WireFields};

/// Longest accepted name identifier.
pub const MAX_NAME_ID_LEN: usize = 64;

/// Check a human readable name identifier.
///
/// Accepted names are 1 to 64 characters of lowercase ASCII letters, digits
/// and `-`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidName`] describing the first problem found.
pub fn validate_name_id(name_id: &str) -> Result<()> {
    let reason = if name_id.is_empty() {
        "must not be empty"
    } else if name_id.len() > MAX_NAME_ID_LEN {
        "must be at most 64 characters"
    } else if !name_id
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        "may only contain lowercase letters, digits and '-'"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidName {
        value: name_id.to_string(),
        reason,
    })
}

/// Top-level grouping of datacenters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Immutable identifier.
    pub cluster_id: ClusterId,
    /// Unique human readable name.
    pub name_id: String,
    /// Creation time.
    pub create_ts: DateTime<Utc>,
    /// Team that owns the cluster, if assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_team_id: Option<TeamId>,
}

impl WireFields for Cluster {
    const FIELDS: &'static [&'static str] = &["cluster_id", "name_id", "create_ts", "owner_team_id"];
}

/// A provider region registered under a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datacenter {
    /// Immutable identifier.
    pub datacenter_id: DatacenterId,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Human readable name, unique within the cluster.
    pub name_id: String,
    /// Name shown in dashboards.
    pub display_name: String,
    /// Cloud provider backing this datacenter.
    pub provider: Provider,
    /// Region identifier as understood by the provider.
    pub provider_datacenter_id: String,
    /// Pools in declaration order.
    #[serde(default)]
    pub pools: Vec<Captured<Pool>>,
    /// How build artifacts are delivered.
    pub build_delivery_method: BuildDeliveryMethod,
    /// Whether prebaked disk images are used.
    #[serde(default)]
    pub prebakes_enabled: bool,
    /// Creation time.
    pub create_ts: DateTime<Utc>,
}

impl Datacenter {
    /// Find a pool by type.
    #[must_use]
    pub fn pool(&self, pool_type: PoolType) -> Option<&Captured<Pool>> {
        self.pools.iter().find(|p| p.pool_type == pool_type)
    }

    /// Find a pool by type for modification.
    pub fn pool_mut(&mut self, pool_type: PoolType) -> Option<&mut Captured<Pool>> {
        self.pools.iter_mut().find(|p| p.pool_type == pool_type)
    }
}

impl WireFields for Datacenter {
    const FIELDS: &'static [&'static str] = &[
        "datacenter_id",
        "cluster_id",
        "name_id",
        "display_name",
        "provider",
        "provider_datacenter_id",
        "pools",
        "build_delivery_method",
        "prebakes_enabled",
        "create_ts",
    ];
}

/// An autoscaling group of servers with one role inside a datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Role of the servers in this pool.
    pub pool_type: PoolType,
    /// Hardware classes, tried in order when provisioning.
    #[serde(default)]
    pub hardware: Vec<Captured<Hardware>>,
    /// Target number of live servers.
    pub desired_count: u32,
    /// Lower bound for `desired_count`.
    pub min_count: u32,
    /// Upper bound for `desired_count`.
    pub max_count: u32,
    /// How long a draining server may finish its work.
    pub drain_timeout_ms: u64,
}

impl Pool {
    /// An empty pool with every count at zero.
    #[must_use]
    pub const fn empty(pool_type: PoolType) -> Self {
        Self {
            pool_type,
            hardware: Vec::new(),
            desired_count: 0,
            min_count: 0,
            max_count: 0,
            drain_timeout_ms: 0,
        }
    }

    /// Check the pool's count and hardware invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPool`] when `min <= desired <= max` does
    /// not hold, or when a pool with a nonzero target has no hardware.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CoreError::InvalidPool {
            pool_type: self.pool_type,
            reason,
        };
        if self.min_count > self.desired_count {
            return Err(invalid(format!(
                "min_count ({}) exceeds desired_count ({})",
                self.min_count, self.desired_count
            )));
        }
        if self.desired_count > self.max_count {
            return Err(invalid(format!(
                "desired_count ({}) exceeds max_count ({})",
                self.desired_count, self.max_count
            )));
        }
        if self.desired_count > 0 && self.hardware.is_empty() {
            return Err(invalid(
                "at least one hardware class is required when desired_count > 0".to_string(),
            ));
        }
        if self
            .hardware
            .iter()
            .any(|hw| hw.provider_hardware.trim().is_empty())
        {
            return Err(invalid("provider_hardware must not be empty".to_string()));
        }
        Ok(())
    }
}

impl WireFields for Pool {
    const FIELDS: &'static [&'static str] = &[
        "pool_type",
        "hardware",
        "desired_count",
        "min_count",
        "max_count",
        "drain_timeout_ms",
    ];
}

/// A provider machine class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    /// Opaque provider identifier, for example `g6-standard-2`.
    pub provider_hardware: String,
}

impl Hardware {
    /// Create a hardware class from a provider identifier.
    pub fn new(provider_hardware: impl Into<String>) -> Self {
        Self {
            provider_hardware: provider_hardware.into(),
        }
    }
}

impl WireFields for Hardware {
    const FIELDS: &'static [&'static str] = &["provider_hardware"];
}

/// A provisioned machine in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Immutable identifier.
    pub server_id: ServerId,
    /// Datacenter the server runs in.
    pub datacenter_id: DatacenterId,
    /// Pool the server belongs to.
    pub pool_type: PoolType,
    /// Public address, known once provisioning completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<IpAddr>,
    /// Lifecycle state.
    pub state: ServerState,
    /// Last reported health.
    pub healthy: bool,
    /// Instance identifier assigned by the provider.
    pub provider_server_id: String,
    /// Hardware class the instance was created with.
    pub provider_hardware: String,
    /// Creation time.
    pub create_ts: DateTime<Utc>,
    /// When draining started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_ts: Option<DateTime<Utc>>,
    /// When the server was terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_ts: Option<DateTime<Utc>>,
}

impl Server {
    /// Whether the server counts toward its pool's live total.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(
            self.state,
            ServerState::Provisioning | ServerState::Active
        )
    }
}

impl WireFields for Server {
    const FIELDS: &'static [&'static str] = &[
        "server_id",
        "datacenter_id",
        "pool_type",
        "public_ip",
        "state",
        "healthy",
        "provider_server_id",
        "provider_hardware",
        "create_ts",
        "drain_ts",
        "terminate_ts",
    ];
}

/// Body returned with every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable description.
    pub message: String,
    /// Request correlation id, also written to the logs.
    pub ray_id: String,
    /// Link to documentation about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    /// Extra details whose shape depends on `code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl WireFields for ErrorBody {
    const FIELDS: &'static [&'static str] =
        &["code", "message", "ray_id", "documentation", "metadata"];
}

/// Version of a watchable collection.
///
/// Carried on the wire as a decimal string so clients treat it as opaque.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatchIndex(pub u64);

impl fmt::Display for WatchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WatchIndex {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidWatchIndex(s.to_string()))
    }
}

impl TryFrom<String> for WatchIndex {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WatchIndex> for String {
    fn from(index: WatchIndex) -> Self {
        index.to_string()
    }
}

/// Version marker attached to every watchable read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchResponse {
    /// Pass back as `?index=` to wait for the next change.
    pub index: WatchIndex,
}

impl WireFields for WatchResponse {
    const FIELDS: &'static [&'static str] = &["index"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn pool(min: u32, desired: u32, max: u32) -> Pool {
        Pool {
            pool_type: PoolType::Job,
            hardware: vec![Hardware::new("g6-standard-2").into()],
            desired_count: desired,
            min_count: min,
            max_count: max,
            drain_timeout_ms: 60_000,
        }
    }

    fn sample_datacenter() -> Value {
        json!({
            "datacenter_id": "6f1c9a5e-8f7d-4d0a-9b5e-1c2d3e4f5a6b",
            "cluster_id": "0b5f8f0e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
            "name_id": "lnd-atl",
            "display_name": "Atlanta",
            "provider": "linode",
            "provider_datacenter_id": "us-southeast",
            "pools": [{
                "pool_type": "job",
                "hardware": [{"provider_hardware": "g6-standard-2", "gpu": false}],
                "desired_count": 2,
                "min_count": 1,
                "max_count": 4,
                "drain_timeout_ms": 3600000,
                "autoscale": {"target_cpu": 0.7}
            }],
            "build_delivery_method": "traffic_server",
            "prebakes_enabled": false,
            "create_ts": "2024-05-01T12:00:00Z",
            "labels": ["edge"]
        })
    }

    #[test]
    fn name_id_rules() {
        assert!(validate_name_id("prod-us-1").is_ok());
        assert!(validate_name_id("").is_err());
        assert!(validate_name_id("Prod").is_err());
        assert!(validate_name_id("under_score").is_err());
        assert!(validate_name_id(&"a".repeat(64)).is_ok());
        assert!(validate_name_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn pool_count_bounds() {
        assert!(pool(1, 3, 5).validate().is_ok());
        assert!(pool(0, 0, 0).validate().is_ok());
        assert!(pool(2, 1, 5).validate().is_err());
        assert!(pool(0, 6, 5).validate().is_err());
    }

    #[test]
    fn pool_with_target_needs_hardware() {
        let mut p = pool(0, 1, 1);
        p.hardware.clear();
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("hardware"));

        p.desired_count = 0;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn datacenter_roundtrip_preserves_unknown_fields() {
        let input = sample_datacenter();
        let dc: Captured<Datacenter> = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(dc.provider, Provider::Linode);
        assert_eq!(dc.pools[0].desired_count, 2);
        assert_eq!(serde_json::to_value(&dc).unwrap(), input);
    }

    #[test]
    fn nested_unknown_fields_survive_pool_edits() {
        let mut dc: Datacenter = serde_json::from_value(sample_datacenter()).unwrap();
        dc.pool_mut(PoolType::Job).unwrap().desired_count = 3;

        let out = serde_json::to_value(&dc).unwrap();
        assert_eq!(out["pools"][0]["desired_count"], 3);
        assert_eq!(out["pools"][0]["autoscale"], json!({"target_cpu": 0.7}));
        assert_eq!(out["pools"][0]["hardware"][0]["gpu"], false);
    }

    #[test]
    fn cluster_and_server_roundtrip_preserve_unknown_fields() {
        let cluster = json!({
            "cluster_id": "0b5f8f0e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
            "name_id": "prod",
            "create_ts": "2024-05-01T12:00:00Z",
            "tier": "gold"
        });
        let parsed: Captured<Cluster> = serde_json::from_value(cluster.clone()).unwrap();
        assert!(parsed.owner_team_id.is_none());
        assert_eq!(serde_json::to_value(&parsed).unwrap(), cluster);

        let server = json!({
            "server_id": "7a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d",
            "datacenter_id": "6f1c9a5e-8f7d-4d0a-9b5e-1c2d3e4f5a6b",
            "pool_type": "gg",
            "public_ip": "203.0.113.7",
            "state": "active",
            "healthy": true,
            "provider_server_id": "lin-123",
            "provider_hardware": "g6-standard-2",
            "create_ts": "2024-05-01T12:00:00Z",
            "vlan_ip": "10.0.0.4"
        });
        let parsed: Captured<Server> = serde_json::from_value(server.clone()).unwrap();
        assert!(parsed.is_live());
        assert_eq!(serde_json::to_value(&parsed).unwrap(), server);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut input = sample_datacenter();
        input["provider"] = json!("azure");
        let err = serde_json::from_value::<Datacenter>(input).unwrap_err();
        assert!(err.to_string().contains("azure"));
    }

    #[test]
    fn watch_index_is_a_decimal_string() {
        let watch = WatchResponse {
            index: WatchIndex(6),
        };
        assert_eq!(serde_json::to_value(watch).unwrap(), json!({"index": "6"}));
        let parsed: WatchResponse = serde_json::from_value(json!({"index": "5"})).unwrap();
        assert_eq!(parsed.index, WatchIndex(5));
        assert!("five".parse::<WatchIndex>().is_err());
    }

    #[test]
    fn wire_fields_cover_serialized_keys() {
        fn assert_covered<T: Serialize + WireFields>(value: &T) {
            let Value::Object(map) = serde_json::to_value(value).unwrap() else {
                panic!("expected object");
            };
            for key in map.keys() {
                assert!(T::FIELDS.contains(&key.as_str()), "missing {key}");
            }
        }

        let dc: Datacenter = serde_json::from_value(sample_datacenter()).unwrap();
        assert_covered(&dc);
        assert_covered(&pool(0, 1, 2));
        assert_covered(&Hardware::new("x"));
        assert_covered(&Cluster {
            cluster_id: ClusterId::generate(),
            name_id: "a".to_string(),
            create_ts: Utc::now(),
            owner_team_id: Some(TeamId::generate()),
        });
        assert_covered(&Server {
            server_id: ServerId::generate(),
            datacenter_id: DatacenterId::generate(),
            pool_type: PoolType::Ats,
            public_ip: Some("10.0.0.1".parse().unwrap()),
            state: ServerState::Draining,
            healthy: false,
            provider_server_id: "p".to_string(),
            provider_hardware: "h".to_string(),
            create_ts: Utc::now(),
            drain_ts: Some(Utc::now()),
            terminate_ts: Some(Utc::now()),
        });
        assert_covered(&ErrorBody {
            code: "conflict".to_string(),
            message: "m".to_string(),
            ray_id: "r".to_string(),
            documentation: Some("d".to_string()),
            metadata: Some(json!({})),
        });
    }
}
