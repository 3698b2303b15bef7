//! Error types for Bay.
//!
//! Each subsystem has its own error enum; `BayError` is the service-level
//! error that crosses the HTTP boundary. The `http` module maps `BayError`
//! variants to status codes.

use thiserror::Error;

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("environment variable {var} is not valid unicode")]
    NotUnicode { var: String },
}

/// Errors from the container driver.
///
/// The driver is stateless; these describe the runtime's view of a single
/// container operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container not found: {container_id}")]
    NotFound { container_id: String },

    #[error("container already exists: {name}")]
    AlreadyExists { name: String },

    #[error("container runtime unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("container operation timed out: {reason}")]
    Timeout { reason: String },
}

/// Errors from the ship repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("store error: {reason}")]
    Store { reason: String },
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        RepositoryError::Store {
            reason: e.to_string(),
        }
    }
}

/// Service-level errors surfaced through the HTTP API.
#[derive(Debug, Error)]
pub enum BayError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("invalid access token")]
    Unauthorized,

    #[error("ship not found: {ship_id}")]
    NotFound { ship_id: String },

    #[error("ship {ship_id} is {state}")]
    IllegalState { ship_id: String, state: String },

    #[error("fleet capacity exhausted: {reason}")]
    CapacityExhausted { reason: String },

    #[error("ship {ship_id} failed to start: {reason}")]
    StartupFailed { ship_id: String, reason: String },

    #[error("upstream unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("upstream deadline exceeded: {reason}")]
    DeadlineExceeded { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<RepositoryError> for BayError {
    fn from(e: RepositoryError) -> Self {
        BayError::Internal {
            reason: e.to_string(),
        }
    }
}

impl From<DriverError> for BayError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Timeout { reason } => BayError::DeadlineExceeded { reason },
            other => BayError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}
