//! Cluster registry endpoints.
//!
//! Clusters are addressed by id or by `name_id`; both forms are accepted in
//! the `:cluster_id` path segment.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetplane_control::{Captured, Cluster, ClusterPatch, ControlPlane, CreateClusterRequest};
use fleetplane_core::WatchResponse;

use crate::error::ApiError;
use crate::handlers::{json_body, query_params, resolve_cluster, DeleteQuery, WatchQuery};
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for a single cluster.
#[derive(Debug, Serialize)]
pub struct ClusterResponse {
    /// The cluster.
    pub cluster: Captured<Cluster>,
}

/// Response for the cluster list.
#[derive(Debug, Serialize)]
pub struct ListClustersResponse {
    /// Every cluster.
    pub clusters: Vec<Captured<Cluster>>,
    /// Version of the list.
    pub watch: WatchResponse,
}

// =============================================================================
// Handlers
// =============================================================================

/// List clusters, long polling when `?index=` is given.
///
/// # Errors
///
/// Returns an error if the index is malformed or the store fails.
pub async fn list_clusters<C>(
    State(state): State<Arc<GatewayState<C>>>,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let query = query_params(query)?;
    let watched = state.control.watch_clusters(query.index).await?;

    Ok(Json(ListClustersResponse {
        clusters: watched.value,
        watch: WatchResponse {
            index: watched.index,
        },
    }))
}

/// Create a cluster.
///
/// # Errors
///
/// Returns an error if the name is invalid or already taken.
pub async fn create_cluster<C>(
    State(state): State<Arc<GatewayState<C>>>,
    body: Result<Json<Captured<CreateClusterRequest>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let request = json_body(body)?;
    let cluster = state.control.create_cluster(request).await?;

    tracing::info!(cluster_id = %cluster.cluster_id, name_id = %cluster.name_id, "Cluster created via API");

    Ok((StatusCode::CREATED, Json(ClusterResponse { cluster })))
}

/// Get a cluster by id or name.
///
/// # Errors
///
/// Returns an error if the cluster does not exist.
pub async fn get_cluster<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(cluster): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let cluster = resolve_cluster(state.control.as_ref(), &cluster).await?;
    Ok(Json(ClusterResponse { cluster }))
}

/// Rename a cluster or change its owner.
///
/// # Errors
///
/// Returns an error if the cluster does not exist or the new name is taken.
pub async fn update_cluster<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(cluster): Path<String>,
    body: Result<Json<Captured<ClusterPatch>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let patch = json_body(body)?;
    let cluster_id = resolve_cluster(state.control.as_ref(), &cluster)
        .await?
        .cluster_id;
    let cluster = state.control.update_cluster(&cluster_id, patch).await?;
    Ok(Json(ClusterResponse { cluster }))
}

/// Delete a cluster and its datacenters.
///
/// # Errors
///
/// Returns a conflict if live servers remain and `?force=true` is not set.
pub async fn delete_cluster<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(cluster): Path<String>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let query = query_params(query)?;
    let cluster_id = resolve_cluster(state.control.as_ref(), &cluster)
        .await?
        .cluster_id;
    state
        .control
        .delete_cluster(&cluster_id, query.force)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
