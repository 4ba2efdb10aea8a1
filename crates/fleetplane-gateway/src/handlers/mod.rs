//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API, plus
//! the extractor helpers they share.

use std::str::FromStr;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::Json;
use serde::Deserialize;

use fleetplane_control::{Captured, Cluster, ClusterId, ControlPlane, WatchIndex};

use crate::error::ApiError;

pub mod clusters;
pub mod datacenters;
pub mod health;
pub mod internal;
pub mod pools;
pub mod servers;

/// Query parameters accepted by every watchable list.
#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    /// Last index the client saw. When present the request blocks until the
    /// collection moves past it or the watch times out.
    #[serde(default)]
    pub index: Option<WatchIndex>,
}

/// Query parameters for deletions.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    /// Delete even if live servers remain.
    #[serde(default)]
    pub force: bool,
}

/// Unwrap a JSON body, turning extractor failures into validation errors.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Unwrap query parameters, turning extractor failures into validation errors.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Parse a path identifier.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| ApiError::BadRequest(e.to_string()))
}

/// Look a cluster up by id, falling back to its name.
pub(crate) async fn resolve_cluster<C>(
    control: &C,
    raw: &str,
) -> Result<Captured<Cluster>, ApiError>
where
    C: ControlPlane,
{
    let cluster = match raw.parse::<ClusterId>() {
        Ok(cluster_id) => control.get_cluster(&cluster_id).await?,
        Err(_) => control.resolve_cluster_name(raw).await?,
    };
    Ok(cluster)
}
