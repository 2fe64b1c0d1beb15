//! Error types for catalog access.

use thiserror::Error;

/// Errors raised while reading the catalog.
///
/// `Clone` so one refresh result can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog query failed. Retryable.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// No object with this name exists.
    #[error("catalog object not found: {0}")]
    NotFound(String),

    /// No pooled connection became free in time. Retryable.
    #[error("connection pool exhausted")]
    PoolExhausted,
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_) | CatalogError::PoolExhausted)
    }
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => CatalogError::PoolExhausted,
            other => CatalogError::Unavailable(other.to_string()),
        }
    }
}
