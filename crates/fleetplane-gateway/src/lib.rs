//! HTTP gateway for the fleetplane control plane.
//!
//! This crate exposes cluster, datacenter, pool and server management as
//! JSON endpoints. It handles:
//!
//! - REST endpoints for the cluster hierarchy
//! - Long-poll watches through `?index=`
//! - Internal callbacks from provisioning agents
//! - Uniform error bodies with per-request ray ids
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Clients / provisioning agents               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    fleetplane-gateway                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Router    │ │  Handlers   │ │      ApiError       │    │
//! │  │ + Middleware│ │             │ │    (ErrorBody)      │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌──────────────────┐
//!                    │  Control Plane   │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetplane_control::{ControlPlaneService, NoopProvider};
//! use fleetplane_gateway::{create_router, GatewayConfig, GatewayState};
//! use fleetplane_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetplane")?);
//! let control = Arc::new(ControlPlaneService::with_defaults(
//!     store,
//!     Arc::new(NoopProvider::new()),
//! ));
//!
//! let state = GatewayState::new(control, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
