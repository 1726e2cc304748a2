use ddmrp_core::DomainError;
use ddmrp_events::PublishError;

use crate::providers::{CatalogError, RepositoryError};

pub type EngineResult<T> = Result<T, EngineError>;

/// Use-case error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing entity. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Persistence or collaborator failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// The write committed but its event was not published.
    #[error("{operation} committed but its event was not published: {source}")]
    Unpublished {
        operation: &'static str,
        #[source]
        source: PublishError,
    },
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Internal(_) | EngineError::Unpublished { .. })
    }

    pub(crate) fn unpublished(operation: &'static str) -> impl FnOnce(PublishError) -> Self {
        move |source| EngineError::Unpublished { operation, source }
    }
}

impl From<DomainError> for EngineError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(m) | DomainError::InvalidId(m) => EngineError::Validation(m),
            DomainError::NotFound(m) => EngineError::NotFound(m),
            DomainError::Conflict(m) => EngineError::Conflict(m),
            DomainError::InvariantViolation(m) => EngineError::Internal(m),
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(m) => EngineError::NotFound(m),
            RepositoryError::Conflict(m) => EngineError::Conflict(m),
            RepositoryError::Internal(m) => EngineError::Internal(m),
        }
    }
}

impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(m) => EngineError::NotFound(m),
            CatalogError::Unavailable(m) => EngineError::Internal(m),
        }
    }
}
