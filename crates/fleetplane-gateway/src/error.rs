//! API error types and responses.
//!
//! Every failed request is answered with an [`ErrorBody`] carrying a fresh
//! ray id. The same ray id is written to the log line for the failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use fleetplane_control::ControlError;
use fleetplane_core::{ErrorBody, ErrorKind};

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid path, query or body.
    #[error("{0}")]
    BadRequest(String),

    /// No route matches the request.
    #[error("no route for {0}")]
    NoRoute(String),

    /// The control plane rejected or failed the operation.
    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ApiError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::Validation,
            Self::NoRoute(_) => ErrorKind::NotFound,
            Self::Control(e) => e.kind(),
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Details for clients that want more than the message.
    #[must_use]
    pub fn metadata(&self) -> Option<serde_json::Value> {
        let Self::Control(err) = self else {
            return None;
        };
        match err {
            ControlError::LiveServers { live } => Some(json!({ "live_servers": live })),
            ControlError::InvalidTransition {
                server_id,
                from,
                to,
            } => Some(json!({
                "server_id": server_id,
                "from": from,
                "to": to,
            })),
            ControlError::ProviderRegionTaken {
                provider,
                region,
                cluster_id,
            } => Some(json!({
                "provider": provider,
                "provider_datacenter_id": region,
                "cluster_id": cluster_id,
            })),
            _ => None,
        }
    }

    /// Build the response body with the given ray id.
    #[must_use]
    pub fn to_body(&self, ray_id: String) -> ErrorBody {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        };
        ErrorBody {
            code: kind.code().to_string(),
            message,
            ray_id,
            documentation: None,
            metadata: self.metadata(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let ray_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(ray_id = %ray_id, code = self.kind().code(), error = %self, "Request failed");
        } else {
            tracing::debug!(ray_id = %ray_id, code = self.kind().code(), error = %self, "Request rejected");
        }

        (status, Json(self.to_body(ray_id))).into_response()
    }
}
