//! Property-definition schemas
//!
//! A schema describes how a document decomposes into tokens: one
//! token-selector path, namespace bindings for prefixed selectors, and an
//! ordered list of property definitions evaluated relative to each token.
//! Built once per document and immutable afterwards; loadable from an XML
//! descriptor or from the store's projection of an imported document.

mod errors;
mod loader;
mod types;

pub use errors::{SchemaError, SchemaResult};
pub use loader::ProjectedProperty;
pub use types::{PropertyDefinition, PropertyType, RESERVED_NAMES};

use std::collections::HashSet;
use std::path::Path;

use crate::xml::{NsScope, Selector};

/// An immutable, validated property-definition set
#[derive(Debug, Clone)]
pub struct Schema {
    token_selector: Selector,
    namespaces: NsScope,
    properties: Vec<PropertyDefinition>,
}

impl Schema {
    pub fn from_file(path: &Path) -> SchemaResult<Schema> {
        loader::from_descriptor_file(path)
    }

    pub fn from_xml(xml: &str) -> SchemaResult<Schema> {
        loader::from_descriptor_str(xml)
    }

    /// Rebuilds a schema from the store's rows for an imported document.
    pub fn from_projection(
        token_selector: &str,
        namespaces: Vec<(String, String)>,
        properties: Vec<ProjectedProperty>,
    ) -> SchemaResult<Schema> {
        loader::from_projection(token_selector, namespaces, properties)
    }

    /// Validates and freezes the parts gathered by either loading path.
    pub(crate) fn assemble(
        token_selector: &str,
        namespaces: Vec<(String, String)>,
        properties: Vec<PropertyDefinition>,
    ) -> SchemaResult<Schema> {
        let token_selector =
            Selector::parse(token_selector).map_err(|source| SchemaError::Selector {
                selector: token_selector.to_string(),
                source,
            })?;

        let mut scope = NsScope::new();
        for (prefix, uri) in namespaces {
            if scope.insert(prefix.clone(), uri).is_some() {
                return Err(SchemaError::DuplicatePrefix(prefix));
            }
        }

        if properties.is_empty() {
            return Err(SchemaError::NoProperties);
        }
        let mut names = HashSet::new();
        for prop in &properties {
            if !names.insert(prop.name.as_str()) {
                return Err(SchemaError::DuplicateName(prop.name.clone()));
            }
        }

        Ok(Schema {
            token_selector,
            namespaces: scope,
            properties,
        })
    }

    pub fn token_selector(&self) -> &Selector {
        &self.token_selector
    }

    pub fn namespaces(&self) -> &NsScope {
        &self.namespaces
    }

    /// Property definitions in ordinal order.
    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }
}
