//! Error types for heal-types crate.

use thiserror::Error;

/// Errors raised while parsing or validating model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    /// Provider identifier could not be parsed.
    #[error("invalid provider id {raw:?}: {reason}")]
    InvalidProviderId { raw: String, reason: &'static str },

    /// Timestamp stored in a tag could not be parsed.
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Result type for model operations.
pub type TypesResult<T> = Result<T, TypesError>;
