//! # AppError
//!
//! Centralized error handling for the KLUTCH marketplace core.
//! Every adapter translates its raw failures (sqlx, io, http) into one of
//! these kinds before they reach a service.

use thiserror::Error;

/// The primary error type for all kl-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Referenced entity does not exist (e.g., posting, bid, tag).
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Bad input: non-positive money, blank field, disallowed media.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Operation is illegal for the entity's current lifecycle state.
    #[error("cannot {action} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// Lost a race for an exclusive transition, or a uniqueness constraint fired.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Device position could not be obtained (denied, unsupported, timed out).
    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    /// Object storage rejected or failed an upload.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Any other external collaborator failed (e.g., geocoding service).
    #[error("upstream service error: {0}")]
    Upstream(String),

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated actor may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Infrastructure failure (e.g., DB down, corrupt row).
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }

    /// Stable machine-readable name, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(..) => "not_found",
            Self::ValidationError(_) => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::LocationUnavailable(_) => "location_unavailable",
            Self::StorageError(_) => "storage",
            Self::Upstream(_) => "upstream",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failure reported by a [`PositionSource`](crate::traits::PositionSource).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("permission to read the device position was denied")]
    PermissionDenied,
    #[error("geolocation is not supported on this device")]
    Unsupported,
    #[error("position request timed out")]
    Timeout,
    #[error("position unavailable: {0}")]
    Unavailable(String),
}

impl From<PositionError> for AppError {
    fn from(err: PositionError) -> Self {
        AppError::LocationUnavailable(err.to_string())
    }
}

/// A specialized Result type for KLUTCH logic.
pub type Result<T> = std::result::Result<T, AppError>;
