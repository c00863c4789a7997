//! Error types for the service registry.

use thiserror::Error;

/// Main error type for registry operations.
///
/// Clone + PartialEq so the sticky error on an evicted subscription can be
/// handed out by value from its handle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service name must not be empty")]
    UnsetService,

    #[error("service name must be lowercase alphanumeric plus dash")]
    InvalidService,

    #[error("proto must be set")]
    UnsetProto,

    #[error("proto must be lowercase alphanumeric")]
    InvalidProto,

    #[error("invalid address: {0}")]
    InvalidAddr(String),

    #[error("instance id is incorrect, expected {expected}")]
    IdMismatch { expected: String },

    #[error("channel send failed due to blocked receiver")]
    SendBlocked,
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
