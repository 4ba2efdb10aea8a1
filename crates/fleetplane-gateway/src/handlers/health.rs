//! Health check endpoint.
//!
//! The check reads the cluster list, so a broken store turns the gateway
//! unhealthy instead of only the requests that touch it.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetplane_control::ControlPlane;

use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unavailable`.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Number of registered clusters, when the store answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<usize>,
}

/// Health check handler.
///
/// # Example
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "clusters": 3
/// }
/// ```
pub async fn health<C>(State(state): State<Arc<GatewayState<C>>>) -> impl IntoResponse
where
    C: ControlPlane + 'static,
{
    let version = env!("CARGO_PKG_VERSION");
    match state.control.list_clusters().await {
        Ok(clusters) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version,
                clusters: Some(clusters.len()),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                    version,
                    clusters: None,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleetplane_control::{ControlPlaneService, CreateClusterRequest, MockProvider};
    use fleetplane_store::MemoryStore;

    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn health_counts_clusters() {
        let control = ControlPlaneService::with_defaults(
            Arc::new(MemoryStore::new()),
            Arc::new(MockProvider::new()),
        );
        control
            .create_cluster(CreateClusterRequest::new("prod").into())
            .await
            .unwrap();
        let state = Arc::new(GatewayState::new(
            Arc::new(control),
            GatewayConfig::default(),
        ));

        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
