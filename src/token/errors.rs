//! Token-level errors

use thiserror::Error;

use crate::store::StoreError;
use crate::xml::XmlError;

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Errors raised while persisting or transforming a single token
#[derive(Debug, Error)]
pub enum TokenError {
    /// A required property did not resolve to exactly one node. Collected
    /// during construction, raised only at save time.
    #[error("token {token_id}: property not resolved: {}", properties.join(", "))]
    PropertyMissing {
        token_id: i64,
        properties: Vec<String>,
    },

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
