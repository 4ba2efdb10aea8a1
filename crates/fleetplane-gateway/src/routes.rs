//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::http::Uri;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use fleetplane_control::ControlPlane;

use crate::error::ApiError;
use crate::handlers::{clusters, datacenters, health, internal, pools, servers};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Clusters
/// - `GET /v1/clusters` - List clusters (`?index=` watches)
/// - `POST /v1/clusters` - Create cluster
/// - `GET /v1/clusters/:cluster_id` - Get cluster by id or name
/// - `PATCH /v1/clusters/:cluster_id` - Update cluster
/// - `DELETE /v1/clusters/:cluster_id` - Delete cluster (`?force=true`)
///
/// ## Datacenters
/// - `GET /v1/clusters/:cluster_id/datacenters` - List datacenters (`?index=` watches)
/// - `POST /v1/clusters/:cluster_id/datacenters` - Create datacenter
/// - `GET /v1/datacenters/:datacenter_id` - Get datacenter
/// - `PATCH /v1/datacenters/:datacenter_id` - Update datacenter and pools
/// - `DELETE /v1/datacenters/:datacenter_id` - Delete datacenter (`?force=true`)
///
/// ## Pools
/// - `GET /v1/datacenters/:datacenter_id/pools` - List pools (`?index=` watches)
/// - `PATCH /v1/datacenters/:datacenter_id/pools/:pool_type` - Update pool
/// - `POST /v1/datacenters/:datacenter_id/pools/:pool_type/reconcile` - Reconcile pool
///
/// ## Servers
/// - `GET /v1/datacenters/:datacenter_id/servers` - List servers (`?index=` watches)
/// - `GET /v1/servers/:server_id` - Get server
///
/// ## Internal
/// - `POST /internal/servers/:server_id/provisioned` - Provisioning finished
/// - `POST /internal/servers/:server_id/health` - Health report
/// - `POST /internal/servers/:server_id/drained` - Drain finished
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: ControlPlane + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health::<C>))
        // Clusters
        .route(
            "/v1/clusters",
            get(clusters::list_clusters::<C>).post(clusters::create_cluster::<C>),
        )
        .route(
            "/v1/clusters/:cluster_id",
            get(clusters::get_cluster::<C>)
                .patch(clusters::update_cluster::<C>)
                .delete(clusters::delete_cluster::<C>),
        )
        // Datacenters
        .route(
            "/v1/clusters/:cluster_id/datacenters",
            get(datacenters::list_datacenters::<C>).post(datacenters::create_datacenter::<C>),
        )
        .route(
            "/v1/datacenters/:datacenter_id",
            get(datacenters::get_datacenter::<C>)
                .patch(datacenters::update_datacenter::<C>)
                .delete(datacenters::delete_datacenter::<C>),
        )
        // Pools
        .route(
            "/v1/datacenters/:datacenter_id/pools",
            get(pools::list_pools::<C>),
        )
        .route(
            "/v1/datacenters/:datacenter_id/pools/:pool_type",
            patch(pools::update_pool::<C>),
        )
        .route(
            "/v1/datacenters/:datacenter_id/pools/:pool_type/reconcile",
            post(pools::reconcile_pool::<C>),
        )
        // Servers
        .route(
            "/v1/datacenters/:datacenter_id/servers",
            get(servers::list_servers::<C>),
        )
        .route("/v1/servers/:server_id", get(servers::get_server::<C>))
        // Internal
        .route(
            "/internal/servers/:server_id/provisioned",
            post(internal::server_provisioned::<C>),
        )
        .route(
            "/internal/servers/:server_id/health",
            post(internal::server_health::<C>),
        )
        .route(
            "/internal/servers/:server_id/drained",
            post(internal::server_drained::<C>),
        )
        .fallback(no_route)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn no_route(uri: Uri) -> ApiError {
    ApiError::NoRoute(uri.path().to_string())
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
