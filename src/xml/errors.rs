//! XML support-layer errors

use thiserror::Error;

/// Result type for XML tree operations
pub type XmlResult<T> = Result<T, XmlError>;

/// Errors raised while parsing, mutating or serializing XML trees
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Parse(String),

    #[error("invalid UTF-8 in XML input")]
    Utf8,

    #[error("node {0} is not an element")]
    NotAnElement(usize),

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        XmlError::Parse(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        XmlError::Parse(e.to_string())
    }
}

impl From<quick_xml::escape::EscapeError> for XmlError {
    fn from(e: quick_xml::escape::EscapeError) -> Self {
        XmlError::Parse(e.to_string())
    }
}

impl From<std::str::Utf8Error> for XmlError {
    fn from(_: std::str::Utf8Error) -> Self {
        XmlError::Utf8
    }
}

/// Errors raised while parsing a selector path.
///
/// The selector grammar is deliberately restricted (see `xml::select`); any
/// construct outside it is a syntax error, never a silent approximation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unsupported selector syntax near '{0}'")]
    Syntax(String),

    #[error("attribute step must be the last step in '{0}'")]
    AttributeNotLast(String),
}
