//! # AppError
//!
//! Centralized error handling for the board.
//! Every variant except `Internal` carries a message that is safe to show
//! to the client as-is.

use thiserror::Error;

/// The primary error type for all cb-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown post id, manage token or conversation. Wrong guesses and
    /// rows that never existed look the same.
    #[error("{0}")]
    NotFound(String),

    /// Rejected input (e.g. missing location for an in-person post)
    #[error("{0}")]
    Validation(String),

    /// Wrong or missing owner key
    #[error("{0}")]
    Forbidden(String),

    /// A capability the operator never configured (e.g. owner delete key)
    #[error("{0}")]
    NotConfigured(String),

    /// Rate limit exceeded
    #[error("{0}")]
    RateLimited(String),

    /// The relay could not deliver on a path where delivery is mandatory
    #[error("{0}")]
    Relay(String),

    /// Infrastructure failure (e.g. storage). Details are logged, not returned.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }
}

/// A specialized Result type for board logic.
pub type Result<T> = std::result::Result<T, AppError>;
