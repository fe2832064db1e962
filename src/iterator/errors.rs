//! Iterator-strategy errors

use thiserror::Error;

use crate::store::StoreError;
use crate::xml::XmlError;

/// Result type for iterator operations
pub type IterResult<T> = Result<T, IteratorError>;

/// Errors raised by the token iterator strategies
#[derive(Debug, Error)]
pub enum IteratorError {
    /// The token selector exceeds what this strategy can evaluate. Raised at
    /// construction; triggers a fallback only when strategy selection was
    /// automatic.
    #[error("token selector '{0}' is too complicated for the streaming strategy")]
    UnsupportedSelector(String),

    #[error("{0} is not supported by this iterator strategy")]
    UnsupportedOperation(&'static str),

    #[error("export requires an iterator constructed in export mode")]
    NotExportable,

    #[error("no current token to replace")]
    NoCurrentToken,

    #[error("token {got} is not the current token ({expected})")]
    TokenMismatch { expected: i64, got: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
