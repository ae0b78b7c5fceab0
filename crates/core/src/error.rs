//! Error types for the pubvec pipeline.
//!
//! This module defines a unified error enum that covers all error categories
//! in the application: configuration, I/O, embedding, the two store
//! boundaries, and serialization.

use thiserror::Error;

/// Unified error type for the pubvec pipeline.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// We never panic — errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding model/input problem. Batch-level, not retried automatically.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Transient infrastructure problem on either store. Safe to retry the
    /// whole batch.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Permanent misconfiguration, e.g. a collection that already exists
    /// with a different dimension. Requires operator intervention.
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Data problem (constraint violation, malformed payload). The batch is
    /// rejected.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl AppError {
    /// Whether retrying the same batch could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_) | AppError::Io(_))
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AppError::SchemaConflict("dim".into()).is_retryable());
        assert!(!AppError::Integrity("dup".into()).is_retryable());
        assert!(!AppError::Embedding("too long".into()).is_retryable());
    }

    #[test]
    fn test_display_names_category() {
        let err = AppError::SchemaConflict("dimension 384 != 768".into());
        assert!(err.to_string().starts_with("Schema conflict:"));
    }
}
