//! Pool controller endpoints.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetplane_control::{
    Captured, ControlPlane, DatacenterId, Pool, PoolPatch, PoolType, PoolUpdate, ScaleReport,
};
use fleetplane_core::WatchResponse;

use crate::error::ApiError;
use crate::handlers::{json_body, parse_id, query_params, WatchQuery};
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for a datacenter's pools.
#[derive(Debug, Serialize)]
pub struct ListPoolsResponse {
    /// Pools in declaration order.
    pub pools: Vec<Captured<Pool>>,
    /// Version of the list.
    pub watch: WatchResponse,
}

/// Response for a pool update.
#[derive(Debug, Serialize)]
pub struct UpdatePoolResponse {
    /// The pool after the update.
    pub pool: Captured<Pool>,
    /// Reconciliation outcome.
    pub reports: Vec<ScaleReport>,
}

/// Response for an explicit reconciliation.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// Reconciliation outcome.
    pub report: ScaleReport,
}

fn parse_pool_type(raw: &str) -> Result<PoolType, ApiError> {
    PoolType::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// List a datacenter's pools, long polling when `?index=` is given.
///
/// # Errors
///
/// Returns an error if the datacenter does not exist.
pub async fn list_pools<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(datacenter_id): Path<String>,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let query = query_params(query)?;
    let watched = state
        .control
        .watch_pools(&datacenter_id, query.index)
        .await?;

    Ok(Json(ListPoolsResponse {
        pools: watched.value,
        watch: WatchResponse {
            index: watched.index,
        },
    }))
}

/// Patch one pool and reconcile it. A missing pool is created first.
///
/// # Errors
///
/// Returns a validation error, leaving the pool unchanged, if the result
/// would break the pool's bounds.
pub async fn update_pool<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path((datacenter_id, pool_type)): Path<(String, String)>,
    body: Result<Json<PoolPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let pool_type = parse_pool_type(&pool_type)?;
    let patch = json_body(body)?;

    let reconciled = state
        .control
        .update_pool(&datacenter_id, PoolUpdate { pool_type, patch })
        .await?;

    Ok(Json(UpdatePoolResponse {
        pool: reconciled.value,
        reports: reconciled.reports,
    }))
}

/// Bring a pool to its target without changing it.
///
/// # Errors
///
/// Returns an error if the datacenter or the pool does not exist.
pub async fn reconcile_pool<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path((datacenter_id, pool_type)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let datacenter_id: DatacenterId = parse_id(&datacenter_id)?;
    let pool_type = parse_pool_type(&pool_type)?;
    let report = state
        .control
        .reconcile_pool(&datacenter_id, pool_type)
        .await?;
    Ok(Json(ReconcileResponse { report }))
}
