//! Internal API endpoints.
//!
//! These endpoints are called by provisioning agents and health checkers
//! running next to the servers. They should only be reachable from inside
//! the fleet network.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use fleetplane_control::{ControlPlane, ScaleReport, Server, ServerId};

use crate::error::ApiError;
use crate::handlers::servers::ServerResponse;
use crate::handlers::{json_body, parse_id};
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for a finished provisioning.
#[derive(Debug, Deserialize)]
pub struct ProvisionedRequest {
    /// Address the server is reachable at.
    pub public_ip: IpAddr,
}

/// Response for a finished provisioning.
#[derive(Debug, Serialize)]
pub struct ProvisionedResponse {
    /// The server, now active.
    pub server: Server,
    /// Reconciliation outcome for the server's pool.
    pub reports: Vec<ScaleReport>,
}

/// Request body for a health report.
#[derive(Debug, Deserialize)]
pub struct HealthReportRequest {
    /// Whether the server passed its checks.
    pub healthy: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// Mark a provisioning server active.
///
/// # Errors
///
/// Returns a conflict if the server is not provisioning.
pub async fn server_provisioned<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(server_id): Path<String>,
    body: Result<Json<ProvisionedRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id: ServerId = parse_id(&server_id)?;
    let body = json_body(body)?;

    tracing::info!(server_id = %server_id, public_ip = %body.public_ip, "Received provisioning confirmation");

    let reconciled = state
        .control
        .confirm_provisioned(&server_id, body.public_ip)
        .await?;

    Ok(Json(ProvisionedResponse {
        server: reconciled.value,
        reports: reconciled.reports,
    }))
}

/// Record a server's health.
///
/// # Errors
///
/// Returns an error if the server does not exist.
pub async fn server_health<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(server_id): Path<String>,
    body: Result<Json<HealthReportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id: ServerId = parse_id(&server_id)?;
    let body = json_body(body)?;
    let server = state
        .control
        .report_health(&server_id, body.healthy)
        .await?;
    Ok(Json(ServerResponse { server }))
}

/// Terminate a draining server that has no work left.
///
/// # Errors
///
/// Returns a conflict if the server is not draining.
pub async fn server_drained<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id: ServerId = parse_id(&server_id)?;

    tracing::info!(server_id = %server_id, "Received drain confirmation");

    let server = state.control.confirm_drained(&server_id).await?;
    Ok(Json(ServerResponse { server }))
}
