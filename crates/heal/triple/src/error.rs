//! Error types for heal-triple crate.

use heal_infra::InfraError;
use thiserror::Error;

/// Errors raised while building a snapshot.
#[derive(Debug, Error)]
pub enum TripleError {
    /// One of the views could not be collected.
    #[error("collect {view}: {source}")]
    Collect {
        view: &'static str,
        #[source]
        source: InfraError,
    },
}

impl TripleError {
    pub(crate) fn collect(view: &'static str) -> impl FnOnce(InfraError) -> Self {
        move |source| TripleError::Collect { view, source }
    }
}

/// Result type for snapshot operations.
pub type TripleResult<T> = Result<T, TripleError>;
