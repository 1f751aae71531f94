//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid image key: {0}")]
    InvalidKey(String),

    #[error("unknown image status: {0}")]
    InvalidStatus(String),

    #[error("unknown image format: {0}")]
    InvalidFormat(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
