use thiserror::Error;

use crate::store::StoreError;

pub type UserResult<T> = Result<T, UserError>;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("document {0} would be left without an owner")]
    LastOwner(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
