//! Cloud provider integration.
//!
//! The control plane never talks to a cloud API directly. Every instance
//! operation goes through a [`ProviderClient`], which lets deployments plug in
//! an HTTP provisioning service and lets tests observe and script provider
//! behavior.

mod http;
#[cfg(any(test, feature = "test-utils"))]
mod mock;

use async_trait::async_trait;
use fleetplane_core::{DatacenterId, ErrorKind, PoolType, Provider, ServerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpProviderClient;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockProvider, ProviderCall};

/// A result type using `ProviderError`.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Errors reported by a provider client.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider does not know the region.
    #[error("{provider} has no region {region:?}")]
    UnknownRegion {
        /// The provider that was asked.
        provider: Provider,
        /// The rejected region.
        region: String,
    },

    /// The provider rejected the request as malformed.
    #[error("provider rejected request: {0}")]
    InvalidRequest(String),

    /// The provider could not be reached.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider answered with an error status.
    #[error("provider returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },
}

impl ProviderError {
    /// Classify this error.
    ///
    /// Rejections of the request itself are validation failures; everything
    /// else is a transient provider failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownRegion { .. } | Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Request(_) | Self::Status { .. } => ErrorKind::Provider,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }
}

/// Parameters for creating a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Id the control plane assigned to the server.
    pub server_id: ServerId,
    /// Datacenter the server will belong to.
    pub datacenter_id: DatacenterId,
    /// Provider to create the instance with.
    pub provider: Provider,
    /// Region to create the instance in.
    pub provider_datacenter_id: String,
    /// Role of the server.
    pub pool_type: PoolType,
    /// Machine class to request.
    pub provider_hardware: String,
}

/// An instance the provider has started creating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedInstance {
    /// Provider-side instance identifier.
    pub provider_server_id: String,
}

/// Trait for cloud provider communication.
///
/// This trait abstracts the provider interface, allowing for mock
/// implementations in tests.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Check that a region exists.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownRegion` if the provider has no such region.
    async fn resolve_region(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> ProviderResult<()>;

    /// Start creating an instance.
    ///
    /// Completion is reported back asynchronously once the instance has a
    /// public address.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider refuses or fails the request.
    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionedInstance>;

    /// Ask an instance to stop accepting work and finish what it has.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails the request.
    async fn drain(&self, provider: Provider, provider_server_id: &str) -> ProviderResult<()>;

    /// Destroy an instance. Destroying an unknown instance succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails the request.
    async fn destroy(&self, provider: Provider, provider_server_id: &str) -> ProviderResult<()>;
}

/// A provider client for when no provisioning service is configured.
///
/// Every region resolves, and instances are only simulated.
#[derive(Debug, Clone, Default)]
pub struct NoopProvider;

impl NoopProvider {
    /// Create a new no-op provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProviderClient for NoopProvider {
    async fn resolve_region(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> ProviderResult<()> {
        tracing::debug!(
            provider = %provider,
            region = %provider_datacenter_id,
            "NoopProvider: accepting region without a provider"
        );
        Ok(())
    }

    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionedInstance> {
        tracing::warn!(
            server_id = %request.server_id,
            hardware = %request.provider_hardware,
            "NoopProvider: provision called but no provider configured"
        );
        Ok(ProvisionedInstance {
            provider_server_id: format!("noop-{}", request.server_id),
        })
    }

    async fn drain(&self, _provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        tracing::warn!(
            provider_server_id = %provider_server_id,
            "NoopProvider: drain called but no provider configured"
        );
        Ok(())
    }

    async fn destroy(&self, _provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        tracing::warn!(
            provider_server_id = %provider_server_id,
            "NoopProvider: destroy called but no provider configured"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            ProviderError::InvalidRequest("bad hardware".to_string()).kind(),
            ErrorKind::Validation
        );
        assert!(ProviderError::Status {
            status: 503,
            message: "busy".to_string()
        }
        .is_retriable());
    }

    #[tokio::test]
    async fn noop_provider_simulates_instances() {
        let provider = NoopProvider::new();
        provider
            .resolve_region(Provider::Linode, "anywhere")
            .await
            .unwrap();

        let server_id = ServerId::generate();
        let instance = provider
            .provision(&ProvisionRequest {
                server_id,
                datacenter_id: DatacenterId::generate(),
                provider: Provider::Linode,
                provider_datacenter_id: "us-east".to_string(),
                pool_type: PoolType::Job,
                provider_hardware: "g6-standard-2".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(instance.provider_server_id, format!("noop-{server_id}"));
    }
}
