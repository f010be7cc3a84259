//! Catalog error taxonomy
//!
//! Three families of failure reach callers:
//! - not-found: a read that requires existence found nothing
//! - validation: the request contradicts itself or is malformed; raised before any store access
//! - dependency: the store failed or timed out
//!
//! Cache failures are also represented here, but the engine masks them and
//! never returns `Cache` from a public operation.

use std::time::Duration;

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("catalog store error: {0}")]
    Store(String),

    #[error("{dependency} did not respond within {after:?}")]
    Timeout {
        dependency: &'static str,
        after: Duration,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CatalogError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CatalogError::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CatalogError::Validation(_))
    }
}

impl From<DataFusionError> for CatalogError {
    fn from(err: DataFusionError) -> Self {
        CatalogError::Store(err.to_string())
    }
}

impl From<ArrowError> for CatalogError {
    fn from(err: ArrowError) -> Self {
        CatalogError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = CatalogError::not_found("plant", 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "plant 42 not found");

        let err = CatalogError::validation("min_height exceeds max_height");
        assert!(err.is_validation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_datafusion_errors_become_store_errors() {
        let err: CatalogError = DataFusionError::Plan("no such table".into()).into();
        assert!(matches!(err, CatalogError::Store(_)));
    }
}
