//! Store-layer errors

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the relational annotation store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("malformed row payload: {0}")]
    Json(#[from] serde_json::Error),
}
