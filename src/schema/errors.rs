//! Schema loading and validation errors

use thiserror::Error;

use crate::xml::{SelectorError, XmlError};

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while loading or validating a schema descriptor
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot read schema descriptor '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed schema descriptor: {0}")]
    Xml(#[from] XmlError),

    #[error("exactly one tokenXPath has to be provided")]
    TokenSelectorCardinality,

    #[error("exactly one {0} has to be provided")]
    PropertyFieldCardinality(&'static str),

    #[error("no token properties defined")]
    NoProperties,

    #[error("property names are not unique ('{0}')")]
    DuplicateName(String),

    #[error("property '{0}' uses a reserved name")]
    ReservedName(String),

    #[error("duplicate namespace prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("invalid selector '{selector}': {source}")]
    Selector {
        selector: String,
        #[source]
        source: SelectorError,
    },

    #[error("malformed property attributes: {0}")]
    Attributes(#[from] serde_json::Error),
}
