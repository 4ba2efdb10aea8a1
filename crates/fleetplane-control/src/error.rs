//! Error types for the control plane.
//!
//! This module defines all errors that can occur while managing clusters,
//! datacenters, pools and servers. Every variant maps onto an [`ErrorKind`]
//! so callers can render a stable code without matching on variants.

use fleetplane_core::{
    ClusterId, CoreError, DatacenterId, ErrorKind, PoolType, Provider, ServerId, ServerState,
};
use thiserror::Error;

use crate::provider::ProviderError;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested cluster was not found.
    #[error("cluster not found: {0}")]
    ClusterNotFound(ClusterId),

    /// No cluster has the given name.
    #[error("cluster not found: {0:?}")]
    ClusterNameNotFound(String),

    /// The requested datacenter was not found.
    #[error("datacenter not found: {0}")]
    DatacenterNotFound(DatacenterId),

    /// The datacenter has no pool of the given type.
    #[error("datacenter {datacenter_id} has no {pool_type} pool")]
    PoolNotFound {
        /// The datacenter that was searched.
        datacenter_id: DatacenterId,
        /// The missing pool type.
        pool_type: PoolType,
    },

    /// The requested server was not found.
    #[error("server not found: {0}")]
    ServerNotFound(ServerId),

    /// Another cluster already uses this name.
    #[error("cluster name {0:?} is already taken")]
    ClusterNameTaken(String),

    /// Another datacenter in the cluster already uses this name.
    #[error("datacenter name {name_id:?} is already taken in cluster {cluster_id}")]
    DatacenterNameTaken {
        /// The cluster holding the name.
        cluster_id: ClusterId,
        /// The duplicate name.
        name_id: String,
    },

    /// The provider region is registered under a different cluster.
    #[error("{provider} region {region:?} is already registered to cluster {cluster_id}")]
    ProviderRegionTaken {
        /// The provider.
        provider: Provider,
        /// The provider region.
        region: String,
        /// The cluster currently holding the region.
        cluster_id: ClusterId,
    },

    /// The requested server state transition is not valid.
    #[error("invalid state transition for server {server_id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The server being transitioned.
        server_id: ServerId,
        /// The current state.
        from: ServerState,
        /// The requested target state.
        to: ServerState,
    },

    /// Deletion is blocked by servers that are still live.
    #[error("{live} live servers remain; retry with force=true to delete anyway")]
    LiveServers {
        /// Number of provisioning or active servers.
        live: usize,
    },

    /// The request is malformed.
    #[error("{0}")]
    Validation(String),

    /// A core type failed to parse or validate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The cloud provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] fleetplane_store::StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ClusterNotFound(_)
            | Self::ClusterNameNotFound(_)
            | Self::DatacenterNotFound(_)
            | Self::PoolNotFound { .. }
            | Self::ServerNotFound(_) => ErrorKind::NotFound,
            Self::ClusterNameTaken(_)
            | Self::DatacenterNameTaken { .. }
            | Self::ProviderRegionTaken { .. }
            | Self::InvalidTransition { .. }
            | Self::LiveServers { .. } => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Core(e) => e.kind(),
            Self::Provider(e) => e.kind(),
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        self.kind().http_status_code()
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
