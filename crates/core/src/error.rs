//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid logical path: {0}")]
    InvalidPath(String),

    #[error("invalid identity: {0}")]
    InvalidGuid(String),

    #[error("invalid permission string: {0}")]
    InvalidPermissions(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
