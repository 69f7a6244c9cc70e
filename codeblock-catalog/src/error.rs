//! Catalog error types

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// RocksDB internal error
    #[error("Database error: {0}")]
    Database(String),
    /// Code block not found (or the id is not a valid code block id)
    #[error("Code block not found: {0}")]
    NotFound(String),
    /// Rating outside 1..=5
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),
    /// Rating body missing, not JSON, or `rating` not an integer
    #[error("Rating must be an integer between 1 and 5: {0}")]
    MalformedRating(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<rocksdb::Error> for CatalogError {
    fn from(e: rocksdb::Error) -> Self {
        CatalogError::Database(e.to_string())
    }
}
