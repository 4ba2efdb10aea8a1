//! Closed string enums used on the wire.
//!
//! Every enum is transmitted as a lowercase snake case string and has a
//! mandatory parse function. Unknown strings are rejected with an
//! [`EnumParseError`] naming the accepted values; there is no fallback
//! variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a string does not name a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{value:?} is not a valid {kind} (expected one of: {})", .expected.join(", "))]
pub struct EnumParseError {
    /// Name of the enum being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
    /// Every accepted string.
    pub expected: &'static [&'static str],
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            const WIRE: &'static [&'static str] = &[$($wire),+];

            /// The wire string for this value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            /// Parse a wire string.
            ///
            /// # Errors
            ///
            /// Returns [`EnumParseError`] for any string that is not a known value.
            pub fn parse(s: &str) -> Result<Self, EnumParseError> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(EnumParseError {
                        kind: stringify!($name),
                        value: s.to_string(),
                        expected: Self::WIRE,
                    }),
                }
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = EnumParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

wire_enum!(
    /// Cloud provider a datacenter is bound to.
    Provider {
        /// Linode.
        Linode => "linode",
        /// Servers are provisioned and connected by hand.
        Manual => "manual",
    }
);

wire_enum!(
    /// Role of the servers in a pool.
    PoolType {
        /// Job runners.
        Job => "job",
        /// Game gateway edge servers.
        Gg => "gg",
        /// Apache Traffic Server build caches.
        Ats => "ats",
        /// Container actor hosts.
        Pegboard => "pegboard",
        /// Isolate actor hosts.
        PegboardIsolate => "pegboard_isolate",
        /// FoundationDB nodes.
        Fdb => "fdb",
        /// Workflow workers.
        Worker => "worker",
        /// NATS message bus nodes.
        Nats => "nats",
        /// Ingress guard servers.
        Guard => "guard",
    }
);

wire_enum!(
    /// How build artifacts reach servers in a datacenter.
    BuildDeliveryMethod {
        /// Proxied through an edge caching server.
        TrafficServer => "traffic_server",
        /// Fetched directly from object storage.
        S3Direct => "s3_direct",
    }
);

wire_enum!(
    /// Lifecycle state of a server.
    ServerState {
        /// Instance requested from the provider, no public address yet.
        Provisioning => "provisioning",
        /// Serving workload.
        Active => "active",
        /// Finishing in-flight work before termination.
        Draining => "draining",
        /// Instance destroyed; the record is kept for audit until purged.
        Terminated => "terminated",
    }
);
