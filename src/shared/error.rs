//! Shared Error Types
//!
//! This module defines the error taxonomy of the data layer. The same type is
//! returned by the normalizer, both backends, the request lifecycle
//! controller and the data client, so callers branch on one enum.
//!
//! # Error Categories
//!
//! - `Validation` - payload failed the normalizer's required-field checks
//! - `NotAuthenticated` - remote store selected without a signed-in user
//! - `Network` / `Timeout` - the backend call did not complete
//! - `Backend` / `NotFound` - the backend reported a failure
//! - `Cancelled` - the caller's lifecycle ended before completion
//!
//! # Propagation
//!
//! `Validation`, `NotAuthenticated` and `DuplicateRequest` are returned
//! synchronously from a dispatch and never create a pending update. The
//! remaining categories surface through the update event channel as a
//! failure with a [`RollbackReason`].
//!
//! ```rust
//! use mealsync::shared::error::{DataError, RollbackReason};
//!
//! let err = DataError::backend(409, "conflict");
//! assert_eq!(err.reason(), RollbackReason::ServiceError);
//! assert!(!err.is_retryable());
//! ```

use crate::shared::config::ConfigError;
use crate::shared::entity::{EntityFamily, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result alias for data-layer operations
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors produced by the data layer
///
/// `Clone` so that several callers joined on one in-flight request can each
/// receive the outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    /// Payload failed required-field validation
    #[error("validation failed for {family}: {}", errors.join("; "))]
    Validation {
        /// Family the payload was meant for
        family: EntityFamily,
        /// Human-readable messages, one per failed field
        errors: Vec<String>,
    },

    /// Remote store selected but no authenticated identity is available
    #[error("not authenticated: sign in to use remote storage")]
    NotAuthenticated,

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Call did not complete within its budget
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Backend-reported failure such as a constraint violation
    #[error("backend error ({status}): {message}")]
    Backend {
        /// Status code reported by the backend, 0 when not applicable
        status: u16,
        /// Message reported by the backend
        message: String,
    },

    /// Entity does not exist in the selected backend
    #[error("{family} entity not found: {id}")]
    NotFound { family: EntityFamily, id: EntityId },

    /// Caller's lifecycle ended before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Identical operation already in flight and rejection is configured
    #[error("duplicate request already in flight: {0}")]
    DuplicateRequest(String),

    /// Embedded store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON serialization or deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DataError {
    /// Create a validation error with a single message
    pub fn validation(family: EntityFamily, message: impl Into<String>) -> Self {
        Self::Validation {
            family,
            errors: vec![message.into()],
        }
    }

    /// Create a backend-reported error
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Network(_) | DataError::Timeout(_))
    }

    /// Whether the error must be raised to the caller instead of becoming
    /// a failed update
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            DataError::Validation { .. }
                | DataError::NotAuthenticated
                | DataError::DuplicateRequest(_)
                | DataError::Config(_)
        )
    }

    /// Reason reported to subscribers when this error fails an update
    pub fn reason(&self) -> RollbackReason {
        match self {
            DataError::Timeout(_) => RollbackReason::Timeout,
            DataError::Network(_) => RollbackReason::NetworkError,
            DataError::NotAuthenticated => RollbackReason::AuthError,
            DataError::Cancelled => RollbackReason::Cancelled,
            _ => RollbackReason::ServiceError,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Why an optimistic update failed or was rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    /// No terminal signal arrived before a deadline
    Timeout,
    /// Transport failure
    NetworkError,
    /// Backend rejected the operation
    ServiceError,
    /// Remote call without a signed-in user
    AuthError,
    /// Caller's lifecycle ended
    Cancelled,
    /// Rolled back on request
    Manual,
}

impl RollbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackReason::Timeout => "timeout",
            RollbackReason::NetworkError => "network_error",
            RollbackReason::ServiceError => "service_error",
            RollbackReason::AuthError => "auth_error",
            RollbackReason::Cancelled => "cancelled",
            RollbackReason::Manual => "manual",
        }
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
