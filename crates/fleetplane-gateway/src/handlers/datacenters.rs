//! Datacenter manager endpoints.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetplane_control::{
    Captured, ControlPlane, CreateDatacenterRequest, Datacenter, DatacenterId, DatacenterPatch,
    Reconciled, ScaleReport,
};
use fleetplane_core::WatchResponse;

use crate::error::ApiError;
use crate::handlers::{
    json_body, parse_id, query_params, resolve_cluster, DeleteQuery, WatchQuery,
};
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for a single datacenter.
#[derive(Debug, Serialize)]
pub struct DatacenterResponse {
    /// The datacenter.
    pub datacenter: Captured<Datacenter>,
}

/// Response for a mutation that reconciled pools.
#[derive(Debug, Serialize)]
pub struct ReconciledDatacenterResponse {
    /// The datacenter after the change.
    pub datacenter: Captured<Datacenter>,
    /// One report per reconciled pool.
    pub reports: Vec<ScaleReport>,
}

impl From<Reconciled<Captured<Datacenter>>> for ReconciledDatacenterResponse {
    fn from(reconciled: Reconciled<Captured<Datacenter>>) -> Self {
        Self {
            datacenter: reconciled.value,
            reports: reconciled.reports,
        }
    }
}

/// Response for a cluster's datacenter list.
#[derive(Debug, Serialize)]
pub struct ListDatacentersResponse {
    /// Datacenters of the cluster.
    pub datacenters: Vec<Captured<Datacenter>>,
    /// Version of the list.
    pub watch: WatchResponse,
}

// =============================================================================
// Handlers
// =============================================================================

/// List a cluster's datacenters, long polling when `?index=` is given.
///
/// # Errors
///
/// Returns an error if the cluster does not exist.
pub async fn list_datacenters<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(cluster): Path<String>,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let query = query_params(query)?;
    let cluster_id = resolve_cluster(state.control.as_ref(), &cluster)
        .await?
        .cluster_id;
    let watched = state
        .control
        .watch_datacenters(&cluster_id, query.index)
        .await?;

    Ok(Json(ListDatacentersResponse {
        datacenters: watched.value,
        watch: WatchResponse {
            index: watched.index,
        },
    }))
}

/// Create a datacenter in a cluster.
///
/// The response carries the scale reports of the initial provisioning.
///
/// # Errors
///
/// Returns an error if:
/// - The cluster does not exist
/// - The request is malformed or the provider region is unknown
/// - The name or the provider region is taken
pub async fn create_datacenter<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(cluster): Path<String>,
    body: Result<Json<Captured<CreateDatacenterRequest>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let request = json_body(body)?;
    let cluster_id = resolve_cluster(state.control.as_ref(), &cluster)
        .await?
        .cluster_id;
    let reconciled = state
        .control
        .create_datacenter(&cluster_id, request)
        .await?;

    tracing::info!(
        cluster_id = %cluster_id,
        datacenter_id = %reconciled.value.datacenter_id,
        "Datacenter created via API"
    );

    Ok((
        StatusCode::CREATED,
        Json(ReconciledDatacenterResponse::from(reconciled)),
    ))
}

/// Get a datacenter.
///
/// # Errors
///
/// Returns an error if the id is malformed or the datacenter does not exist.
pub async fn get_datacenter<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(datacenter_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let datacenter = state.control.get_datacenter(&datacenter_id).await?;
    Ok(Json(DatacenterResponse { datacenter }))
}

/// Update a datacenter's settings and pools together.
///
/// # Errors
///
/// Returns a validation error, leaving the datacenter unchanged, if any
/// part of the patch is invalid.
pub async fn update_datacenter<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(datacenter_id): Path<String>,
    body: Result<Json<Captured<DatacenterPatch>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let patch = json_body(body)?;
    let reconciled = state
        .control
        .update_datacenter(&datacenter_id, patch)
        .await?;
    Ok(Json(ReconciledDatacenterResponse::from(reconciled)))
}

/// Delete a datacenter and its servers.
///
/// # Errors
///
/// Returns a conflict if live servers remain and `?force=true` is not set.
pub async fn delete_datacenter<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(datacenter_id): Path<String>,
    query: Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let query = query_params(query)?;
    state
        .control
        .delete_datacenter(&datacenter_id, query.force)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
