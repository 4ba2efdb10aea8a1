//! HTTP client for an external provisioning service.
//!
//! The service exposes:
//!
//! - `GET /v1/regions/{provider}/{region}`: 200 if the region exists, 404 otherwise
//! - `POST /v1/servers`: create an instance, returns `{"provider_server_id": ...}`
//! - `POST /v1/servers/{provider}/{provider_server_id}/drain`
//! - `DELETE /v1/servers/{provider}/{provider_server_id}`: 404 counts as destroyed

use std::time::Duration;

use async_trait::async_trait;
use fleetplane_core::Provider;
use serde::Deserialize;

use super::{ProviderClient, ProviderError, ProviderResult, ProvisionRequest, ProvisionedInstance};

/// HTTP client for the provisioning service.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
}

/// Error response from the provisioning service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpProviderClient {
    /// Create a new provider client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the provisioning service (e.g., "http://provisioner:8080")
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a new provider client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the provisioning service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))
    }

    /// Turn an unsuccessful response into an error.
    async fn error_from(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("provider returned status {status}"));

        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            ProviderError::InvalidRequest(message)
        } else {
            ProviderError::Status {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn resolve_region(
        &self,
        provider: Provider,
        provider_datacenter_id: &str,
    ) -> ProviderResult<()> {
        let url = format!(
            "{}/v1/regions/{provider}/{provider_datacenter_id}",
            self.base_url
        );
        let response = self.send(self.client.get(&url)).await?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(ProviderError::UnknownRegion {
                provider,
                region: provider_datacenter_id.to_string(),
            })
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn provision(&self, request: &ProvisionRequest) -> ProviderResult<ProvisionedInstance> {
        let url = format!("{}/v1/servers", self.base_url);
        let response = self.send(self.client.post(&url).json(request)).await?;

        if response.status().is_success() {
            let instance = response
                .json::<ProvisionedInstance>()
                .await
                .map_err(|e| ProviderError::Request(format!("failed to parse response: {e}")))?;
            tracing::debug!(
                server_id = %request.server_id,
                provider_server_id = %instance.provider_server_id,
                "Provisioned instance via provider API"
            );
            Ok(instance)
        } else {
            let err = Self::error_from(response).await;
            tracing::error!(
                server_id = %request.server_id,
                hardware = %request.provider_hardware,
                error = %err,
                "Failed to provision instance"
            );
            Err(err)
        }
    }

    async fn drain(&self, provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        let url = format!(
            "{}/v1/servers/{provider}/{provider_server_id}/drain",
            self.base_url
        );
        let response = self.send(self.client.post(&url)).await?;

        if response.status().is_success() {
            tracing::debug!(provider_server_id = %provider_server_id, "Drained instance via provider API");
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn destroy(&self, provider: Provider, provider_server_id: &str) -> ProviderResult<()> {
        let url = format!(
            "{}/v1/servers/{provider}/{provider_server_id}",
            self.base_url
        );
        let response = self.send(self.client.delete(&url)).await?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(provider_server_id = %provider_server_id, "Destroyed instance via provider API");
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }
}
