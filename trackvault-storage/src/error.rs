//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A row that violates a storage invariant (e.g. a partial encryption record).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("connection lock poisoned")]
    Poisoned,

    /// Failure injected by [`crate::MemoryStore`] fault plans.
    #[error("injected failure: {0}")]
    Injected(String),
}
