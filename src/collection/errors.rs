use thiserror::Error;

use crate::store::StoreError;

pub type CollectionResult<T> = Result<T, CollectionError>;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
