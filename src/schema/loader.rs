//! Descriptor parsing
//!
//! A schema arrives either as an XML descriptor or as the store's projection
//! of a previously imported document. Both paths funnel into
//! [`Schema::assemble`](super::Schema) so they stay value-for-value
//! equivalent.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::xml::{parse_str, NodeId, XmlError, XmlTree};

use super::errors::{SchemaError, SchemaResult};
use super::types::{PropertyDefinition, PropertyType};
use super::Schema;

const KNOWN_PROPERTY_FIELDS: [&str; 5] = [
    "propertyName",
    "propertyXPath",
    "propertyType",
    "readOnly",
    "optional",
];

pub fn from_descriptor_file(path: &Path) -> SchemaResult<Schema> {
    let xml = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_descriptor_str(&xml)
}

pub fn from_descriptor_str(xml: &str) -> SchemaResult<Schema> {
    let tree = parse_str(xml)?;
    let root = tree
        .root_element()
        .ok_or_else(|| SchemaError::Xml(XmlError::Parse("empty schema descriptor".into())))?;

    let token_nodes = child_elements(&tree, root, "tokenXPath");
    if token_nodes.len() != 1 {
        return Err(SchemaError::TokenSelectorCardinality);
    }
    let token_selector = text(&tree, token_nodes[0])?;

    let mut namespaces = Vec::new();
    for list in child_elements(&tree, root, "namespaces") {
        for ns in child_elements(&tree, list, "namespace") {
            let prefix = exactly_one_text(&tree, ns, "prefix")?;
            let uri = exactly_one_text(&tree, ns, "uri")?;
            namespaces.push((prefix, uri));
        }
    }

    let mut properties = Vec::new();
    let mut ord = 1;
    for list in child_elements(&tree, root, "properties") {
        for prop in child_elements(&tree, list, "property") {
            properties.push(parse_property(&tree, prop, ord)?);
            ord += 1;
        }
    }

    Schema::assemble(&token_selector, namespaces, properties)
}

/// One properties-table row, as handed over by the store.
#[derive(Debug, Clone)]
pub struct ProjectedProperty {
    pub name: String,
    pub selector: String,
    pub type_tag: String,
    pub ord: u32,
    pub read_only: bool,
    pub optional: bool,
    /// JSON text of the free-form attribute map; empty means none
    pub attributes_json: String,
}

pub fn from_projection(
    token_selector: &str,
    namespaces: Vec<(String, String)>,
    properties: Vec<ProjectedProperty>,
) -> SchemaResult<Schema> {
    let mut defs = Vec::with_capacity(properties.len());
    for row in properties {
        let mut def = PropertyDefinition::new(
            row.ord,
            &row.name,
            &row.selector,
            PropertyType::from_tag(&row.type_tag),
            row.read_only,
            row.optional,
        )?;
        if !row.attributes_json.is_empty() {
            def.attributes = serde_json::from_str(&row.attributes_json)?;
        }
        defs.push(def);
    }
    Schema::assemble(token_selector, namespaces, defs)
}

fn parse_property(tree: &XmlTree, prop: NodeId, ord: u32) -> SchemaResult<PropertyDefinition> {
    let name = exactly_one_text(tree, prop, "propertyName")?;
    let selector = exactly_one_text(tree, prop, "propertyXPath")?;
    let type_tag = exactly_one_text(tree, prop, "propertyType")?;
    let read_only = !child_elements(tree, prop, "readOnly").is_empty();
    let optional = !child_elements(tree, prop, "optional").is_empty();

    let mut def = PropertyDefinition::new(
        ord,
        &name,
        &selector,
        PropertyType::from_tag(&type_tag),
        read_only,
        optional,
    )?;
    def.attributes = collect_attributes(tree, prop)?;
    Ok(def)
}

/// Folds every descriptor child outside the fixed property fields into the
/// free-form attribute map. Leaf elements become strings, nested elements
/// become objects, repeated names become arrays.
fn collect_attributes(tree: &XmlTree, prop: NodeId) -> SchemaResult<Map<String, Value>> {
    let mut map = Map::new();
    for child in all_child_elements(tree, prop) {
        let el = tree.element(child)?;
        if KNOWN_PROPERTY_FIELDS.contains(&el.qname.as_str()) {
            continue;
        }
        let key = el.qname.clone();
        let value = attribute_value(tree, child)?;
        merge_attribute(&mut map, key, value);
    }
    Ok(map)
}

fn attribute_value(tree: &XmlTree, id: NodeId) -> SchemaResult<Value> {
    let children = all_child_elements(tree, id);
    if children.is_empty() {
        return Ok(Value::String(text(tree, id)?));
    }
    let mut map = Map::new();
    for child in children {
        let key = tree.element(child)?.qname.clone();
        let value = attribute_value(tree, child)?;
        merge_attribute(&mut map, key, value);
    }
    Ok(Value::Object(map))
}

fn merge_attribute(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn all_child_elements(tree: &XmlTree, id: NodeId) -> Vec<NodeId> {
    match tree.element(id) {
        Ok(el) => el
            .children
            .iter()
            .copied()
            .filter(|&c| tree.element(c).is_ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn child_elements(tree: &XmlTree, id: NodeId, name: &str) -> Vec<NodeId> {
    all_child_elements(tree, id)
        .into_iter()
        .filter(|&c| tree.element(c).map(|el| el.qname == name).unwrap_or(false))
        .collect()
}

fn exactly_one_text(tree: &XmlTree, id: NodeId, name: &'static str) -> SchemaResult<String> {
    let nodes = child_elements(tree, id, name);
    if nodes.len() != 1 {
        return Err(SchemaError::PropertyFieldCardinality(name));
    }
    text(tree, nodes[0])
}

fn text(tree: &XmlTree, id: NodeId) -> SchemaResult<String> {
    Ok(tree.text_value(id)?.trim().to_string())
}
