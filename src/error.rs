//! Error types for the pubgate service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for pubgate operations.
#[derive(Error, Debug)]
pub enum PubgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller broke the limiter contract (empty key parts, zero limit or window)
    #[error("Invalid rate limit parameters: {0}")]
    InvalidParameters(String),

    /// No policy is configured for the requested action
    #[error("No rate limit policy for action '{0}'")]
    UnknownAction(String),

    /// Counter store errors that could not be absorbed by the failure policy
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for PubgateError {
    fn from(e: config::ConfigError) -> Self {
        PubgateError::Config(e.to_string())
    }
}

/// Result type alias for pubgate operations.
pub type Result<T> = std::result::Result<T, PubgateError>;
