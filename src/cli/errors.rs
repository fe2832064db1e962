use thiserror::Error;

use crate::collection::CollectionError;
use crate::document::DocumentError;
use crate::export::SinkError;
use crate::store::StoreError;
use crate::users::UserError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid filter '{0}', expected name=pattern")]
    InvalidFilter(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
