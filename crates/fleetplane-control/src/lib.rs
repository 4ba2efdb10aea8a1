//! Control plane for fleetplane.
//!
//! This crate provides the business logic for the cluster hierarchy: the
//! cluster registry, the datacenter manager, the pool controller and the
//! server inventory, plus long-poll watches over all of them. It coordinates
//! between the storage layer and a cloud provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Gateway (HTTP)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                      │
//! │  ┌──────────┐ ┌────────────┐ ┌──────────┐ ┌─────────────┐   │
//! │  │ Clusters │ │Datacenters │ │  Pools   │ │   Servers   │   │
//! │  └──────────┘ └────────────┘ └──────────┘ └─────────────┘   │
//! │  ┌──────────┐ ┌────────────┐ ┌──────────────────────────┐   │
//! │  │  Locks   │ │  Watches   │ │      Drain timers        │   │
//! │  └──────────┘ └────────────┘ └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//!         ┌──────────────┐          ┌────────────────┐
//!         │    Store     │          │    Provider    │
//!         │  (RocksDB)   │          │ (HTTP + retry) │
//!         └──────────────┘          └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetplane_control::{ControlPlane, ControlPlaneService, CreateClusterRequest, NoopProvider};
//! use fleetplane_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetplane")?);
//! let control = ControlPlaneService::with_defaults(store, Arc::new(NoopProvider::new()));
//!
//! let cluster = control.create_cluster(CreateClusterRequest::new("prod").into()).await?;
//! println!("Created cluster: {}", cluster.cluster_id);
//! # Ok(())
//! # }
//! ```
//!
//! # Server lifecycle
//!
//! - `Provisioning` → `Active` (the provider reported the instance up)
//! - `Active` → `Draining` (scale down)
//! - `Draining` → `Active` (reused by a scale up)
//! - `Draining` → `Terminated` (drained, or the drain timeout expired)
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod drain;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod pools;
pub mod provider;
pub mod retry;
pub mod service;
pub mod types;
pub mod watch;

pub use error::{ControlError, Result};
pub use provider::{
    HttpProviderClient, NoopProvider, ProviderClient, ProviderError, ProviderResult,
    ProvisionRequest, ProvisionedInstance,
};
#[cfg(any(test, feature = "test-utils"))]
pub use provider::{MockProvider, ProviderCall};
pub use retry::{RetryConfig, RetryExecutor};
pub use service::{ControlPlane, ControlPlaneService};
pub use types::{
    ClusterPatch, ControlConfig, CreateClusterRequest, CreateDatacenterRequest, DatacenterPatch,
    PoolPatch, PoolUpdate, ProvisionFailure, Reconciled, ScaleReport, ServerFailure, Watched,
};
pub use watch::Collection;

// Re-export commonly used types from dependencies for convenience
pub use fleetplane_core::{
    Captured, Cluster, ClusterId, Datacenter, DatacenterId, ErrorKind, Patch, Pool, PoolType,
    Server, ServerId, ServerState, WatchIndex,
};
