use std::path::PathBuf;

use thiserror::Error;

use crate::export::SinkError;
use crate::iterator::IteratorError;
use crate::schema::SchemaError;
use crate::store::StoreError;
use crate::token::TokenError;

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("stored document content at {path} does not match its recorded hash")]
    ContentIntegrityMismatch { path: PathBuf },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Iterator(#[from] IteratorError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
