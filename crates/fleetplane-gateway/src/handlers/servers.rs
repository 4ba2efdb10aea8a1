//! Server inventory endpoints.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetplane_control::{ControlPlane, DatacenterId, Server, ServerId};
use fleetplane_core::WatchResponse;

use crate::error::ApiError;
use crate::handlers::{parse_id, query_params, WatchQuery};
use crate::state::GatewayState;

/// Response for a single server.
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    /// The server.
    pub server: Server,
}

/// Response for a datacenter's servers.
#[derive(Debug, Serialize)]
pub struct ListServersResponse {
    /// Servers of the datacenter, terminated ones included until purged.
    pub servers: Vec<Server>,
    /// Version of the list.
    pub watch: WatchResponse,
}

/// List a datacenter's servers, long polling when `?index=` is given.
///
/// # Errors
///
/// Returns an error if the datacenter does not exist.
pub async fn list_servers<C>(
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
        .watch_servers(&datacenter_id, query.index)
        .await?;

    Ok(Json(ListServersResponse {
        servers: watched.value,
        watch: WatchResponse {
            index: watched.index,
        },
    }))
}

/// Get a server.
///
/// # Errors
///
/// Returns an error if the id is malformed or the server does not exist.
pub async fn get_server<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id: ServerId = parse_id(&server_id)?;
    let server = state.control.get_server(&server_id).await?;
    Ok(Json(ServerResponse { server }))
}
