//! Property definition types

use serde_json::Map;

use crate::xml::Selector;

use super::errors::{SchemaError, SchemaResult};

/// Property names the query layer claims for itself. A schema defining one of
/// these would collide with token-id matching, paging or document scoping.
pub const RESERVED_NAMES: [&str; 5] = ["token_id", "token", "_offset", "_pagesize", "_docid"];

/// Interpretation tag attached to each property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyType {
    /// Arbitrary text, the default for most annotation layers
    FreeText,
    /// Text restricted to a dictionary of permissible values
    ClosedList,
    /// Structured content: values are XML markup, not escaped text
    Xml,
    /// A tag this crate does not interpret, carried through verbatim
    Other(String),
}

impl PropertyType {
    pub fn from_tag(tag: &str) -> PropertyType {
        match tag {
            "free text" => PropertyType::FreeText,
            "closed list" => PropertyType::ClosedList,
            "xml" => PropertyType::Xml,
            other => PropertyType::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            PropertyType::FreeText => "free text",
            PropertyType::ClosedList => "closed list",
            PropertyType::Xml => "xml",
            PropertyType::Other(tag) => tag,
        }
    }

    /// True when values are markup rather than character data.
    pub fn is_structured(&self) -> bool {
        matches!(self, PropertyType::Xml)
    }
}

/// One property of the schema: a named, typed sub-selector relative to a token
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    pub name: String,
    pub selector: Selector,
    pub property_type: PropertyType,
    /// 1-based ordinal fixing column order in every tabular view
    pub ord: u32,
    pub read_only: bool,
    pub optional: bool,
    /// Free-form descriptor payload (permissible values, UI hints, ...)
    pub attributes: Map<String, serde_json::Value>,
}

impl PropertyDefinition {
    pub fn new(
        ord: u32,
        name: &str,
        selector: &str,
        property_type: PropertyType,
        read_only: bool,
        optional: bool,
    ) -> SchemaResult<PropertyDefinition> {
        if RESERVED_NAMES.contains(&name) {
            return Err(SchemaError::ReservedName(name.to_string()));
        }
        let selector = Selector::parse(selector).map_err(|source| SchemaError::Selector {
            selector: selector.to_string(),
            source,
        })?;
        Ok(PropertyDefinition {
            name: name.to_string(),
            selector,
            property_type,
            ord,
            read_only,
            optional,
            attributes: Map::new(),
        })
    }
}
