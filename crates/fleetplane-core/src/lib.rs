//! Core types for fleetplane.
//!
//! This crate provides the wire model shared by every other fleetplane crate:
//!
//! - **Identifiers**: UUID newtypes for clusters, datacenters, servers and teams
//! - **Enums**: closed string enums with strict parsing
//! - **Entities**: clusters, datacenters, pools, hardware and servers
//! - **Wire helpers**: [`Patch`] for partial updates and [`Captured`] for
//!   preserving unknown fields
//! - **Errors**: the [`ErrorKind`] taxonomy used end to end
//!
//! # Example
//!
//! ```
//! use fleetplane_core::{Captured, Cluster, Provider};
//!
//! let cluster: Captured<Cluster> = serde_json::from_str(r#"{
//!     "cluster_id": "0b5f8f0e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
//!     "name_id": "prod",
//!     "create_ts": "2024-05-01T12:00:00Z",
//!     "region_hint": "us-east"
//! }"#).unwrap();
//! assert_eq!(cluster.name_id, "prod");
//! assert!(serde_json::to_string(&cluster).unwrap().contains("region_hint"));
//!
//! assert!(Provider::parse("azure").is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod enums;
pub mod error;
pub mod ids;
pub mod model;
pub mod patch;
pub mod wire;

pub use enums::{BuildDeliveryMethod, EnumParseError, PoolType, Provider, ServerState};
pub use error::{CoreError, ErrorKind, Result};
pub use ids::{ClusterId, DatacenterId, IdError, ServerId, TeamId};
pub use model::{
    validate_name_id, Cluster, Datacenter, ErrorBody, Hardware, Pool, Server, WatchIndex,
    WatchResponse, MAX_NAME_ID_LEN,
};
pub use patch::Patch;
pub use wire::{Captured, WireFields};
