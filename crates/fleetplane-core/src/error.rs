//! Error taxonomy shared across fleetplane.
//!
//! Every crate has its own error enum, but all of them map onto the same
//! [`ErrorKind`] so that the code reported to a client stays stable no matter
//! which layer failed.

use crate::enums::{EnumParseError, PoolType};
use crate::ids::IdError;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request was malformed or violates an invariant.
    Validation,
    /// The referenced entity does not exist.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// The cloud provider failed. Safe to retry.
    Provider,
    /// Something went wrong inside the control plane.
    Internal,
}

impl ErrorKind {
    /// Stable machine readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Provider => "provider_error",
            Self::Internal => "internal",
        }
    }

    /// HTTP status code for this kind.
    #[must_use]
    pub const fn http_status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Provider => 502,
            Self::Internal => 500,
        }
    }

    /// Whether the failed operation may succeed if retried.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Provider)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised while parsing or validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A string did not name a known enum value.
    #[error(transparent)]
    InvalidEnum(#[from] EnumParseError),

    /// A name identifier broke the naming rules.
    #[error("invalid name_id {value:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        value: String,
        /// Which rule was broken.
        reason: &'static str,
    },

    /// A pool broke its count or hardware invariants.
    #[error("invalid {pool_type} pool: {reason}")]
    InvalidPool {
        /// The offending pool.
        pool_type: PoolType,
        /// Which invariant was broken.
        reason: String,
    },

    /// A watch index was not a decimal number.
    #[error("invalid watch index {0:?}")]
    InvalidWatchIndex(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal(_) => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }
}
