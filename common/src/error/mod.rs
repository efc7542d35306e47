//! Error types for the escrow engine
//!
//! This module provides a unified error handling system for all service crates
//! in the escrow platform. It defines the business-failure taxonomy returned
//! verbatim to callers, plus infrastructure variants for storage failures.
//! Business failures are never retried by the engine itself.

use std::fmt::Display;
use thiserror::Error;

/// Escrow engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// Entity missing, or the actor has no role on the entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor lacks the required role for the action
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not legal in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Balance shortfall; the message carries the numeric deficit
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Offer remaining-amount shortfall; the message carries the deficit
    #[error("Insufficient remaining: {0}")]
    InsufficientRemaining(String),

    /// Duplicate dispute, or a concurrent mutation won the row
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dispute raised outside the allowed window
    #[error("Window expired: {0}")]
    WindowExpired(String),

    /// Malformed holding period code
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Generic validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage error (constraint violation, connectivity loss)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Database migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decimal conversion error
    #[error("Decimal conversion error: {0}")]
    DecimalError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait to add context to error results
pub trait ErrorExt<T> {
    /// Add context information to an error
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display;
}

impl<T> ErrorExt<T> for Result<T> {
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display,
    {
        self.map_err(|e| {
            let context = context_fn().to_string();
            match e {
                Error::NotFound(msg) => Error::NotFound(format!("{}: {}", context, msg)),
                Error::Forbidden(msg) => Error::Forbidden(format!("{}: {}", context, msg)),
                Error::InvalidState(msg) => Error::InvalidState(format!("{}: {}", context, msg)),
                Error::InsufficientFunds(msg) => Error::InsufficientFunds(format!("{}: {}", context, msg)),
                Error::InsufficientRemaining(msg) => Error::InsufficientRemaining(format!("{}: {}", context, msg)),
                Error::Conflict(msg) => Error::Conflict(format!("{}: {}", context, msg)),
                Error::WindowExpired(msg) => Error::WindowExpired(format!("{}: {}", context, msg)),
                Error::InvalidPeriod(msg) => Error::InvalidPeriod(format!("{}: {}", context, msg)),
                Error::ValidationError(msg) => Error::ValidationError(format!("{}: {}", context, msg)),
                Error::ConfigurationError(msg) => Error::ConfigurationError(format!("{}: {}", context, msg)),
                Error::Internal(msg) => Error::Internal(format!("{}: {}", context, msg)),
                Error::Storage(e) => Error::Storage(e),
                Error::Migration(e) => Error::Migration(e),
                Error::Serialization(e) => Error::Serialization(e),
                Error::DecimalError(msg) => Error::DecimalError(format!("{}: {}", context, msg)),
            }
        })
    }
}

/// Convert string messages into an error
impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Internal(message)
    }
}

/// Convert static string references into an error
impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Internal(message.to_string())
    }
}

/// From rust_decimal::Error
impl From<rust_decimal::Error> for Error {
    fn from(err: rust_decimal::Error) -> Self {
        Error::DecimalError(err.to_string())
    }
}
