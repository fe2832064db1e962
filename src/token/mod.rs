//! One decomposed annotation unit
//!
//! A token owns the extracted subtree for one selector match plus the
//! resolution of every schema property against that subtree. Resolution
//! failures are deferred: they are collected at construction and surface only
//! when `save` is called, so one broken token never aborts decomposition of
//! the whole document.

mod errors;

pub use errors::{TokenError, TokenResult};

use std::rc::Rc;

use serde_json::{json, Map, Value};

use crate::schema::{PropertyDefinition, Schema};
use crate::store::StoreSession;
use crate::xml::{MatchRef, NodeId, XmlResult, XmlTree};

const RESOLUTION_FAILURE: &str = "property not found or many properties found";

/// A token: ordinal id, source subtree, per-property node resolutions
pub struct Token {
    id: i64,
    tree: XmlTree,
    root: NodeId,
    schema: Rc<Schema>,
    /// Index-aligned with the schema's properties; `None` marks an absent
    /// optional property.
    resolved: Vec<Option<MatchRef>>,
    /// Deferred resolution failures as (property name, reason)
    invalid: Vec<(String, String)>,
}

impl Token {
    /// Resolves every property selector against the subtree. Infallible with
    /// respect to property resolution; failures are deferred.
    pub fn new(id: i64, tree: XmlTree, schema: Rc<Schema>) -> XmlResult<Token> {
        let root = tree
            .root_element()
            .ok_or_else(|| crate::xml::XmlError::Parse("token subtree has no element".into()))?;

        let mut resolved = Vec::with_capacity(schema.properties().len());
        let mut invalid = Vec::new();
        for def in schema.properties() {
            let hits = def.selector.eval(&tree, root, schema.namespaces());
            match hits.len() {
                1 => resolved.push(Some(hits[0])),
                0 if def.optional => resolved.push(None),
                _ => {
                    resolved.push(None);
                    invalid.push((def.name.clone(), RESOLUTION_FAILURE.to_string()));
                }
            }
        }

        Ok(Token {
            id,
            tree,
            root,
            schema,
            resolved,
            invalid,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Deferred resolution failures, empty for a clean token.
    pub fn invalid_properties(&self) -> &[(String, String)] {
        &self.invalid
    }

    /// Serialized markup of the whole token subtree.
    pub fn markup(&self) -> String {
        self.tree.serialize()
    }

    pub(crate) fn tree(&self) -> &XmlTree {
        &self.tree
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    /// Extracted value of the property at schema index `idx`: an attribute
    /// match yields its string value, an element match its trimmed text, or
    /// its inner markup for structured properties.
    pub fn value(&self, idx: usize) -> XmlResult<Option<String>> {
        let def = &self.schema.properties()[idx];
        match self.resolved[idx] {
            None => Ok(None),
            Some(MatchRef::Attr(node, attr)) => {
                Ok(Some(self.tree.attr_value(node, attr)?.to_string()))
            }
            Some(MatchRef::Node(node)) => {
                if def.property_type.is_structured() {
                    Ok(Some(self.tree.inner_markup(node)?))
                } else {
                    Ok(Some(self.tree.text_value(node)?.trim().to_string()))
                }
            }
        }
    }

    /// Persists the token existence record and one original value per
    /// resolved property. Fails without writing anything when any deferred
    /// resolution failure exists.
    pub fn save(&self, store: &StoreSession, document_id: i64) -> TokenResult<()> {
        if !self.invalid.is_empty() {
            return Err(TokenError::PropertyMissing {
                token_id: self.id,
                properties: self.invalid.iter().map(|(name, _)| name.clone()).collect(),
            });
        }
        store.insert_token(document_id, self.id)?;
        for (idx, def) in self.schema.properties().iter().enumerate() {
            if let Some(value) = self.value(idx)? {
                store.insert_orig_value(document_id, self.id, def.selector.as_str(), &value)?;
            }
        }
        Ok(())
    }

    /// Writes each property's current edit back into the subtree in place.
    /// Returns whether anything actually changed; untouched tokens keep their
    /// raw source text and re-serialize byte-for-byte.
    pub fn update(&mut self, store: &StoreSession, document_id: i64) -> TokenResult<bool> {
        let mut changed = false;
        let properties: Vec<PropertyDefinition> = self.schema.properties().to_vec();
        for (idx, def) in properties.iter().enumerate() {
            let Some(hit) = self.resolved[idx] else {
                continue;
            };
            let Some(new_value) = store.current_edit(document_id, def.selector.as_str(), self.id)?
            else {
                continue;
            };
            if self.value(idx)?.as_deref() == Some(new_value.as_str()) {
                continue;
            }
            match hit {
                MatchRef::Attr(node, attr) => self.tree.set_attr_value(node, attr, &new_value)?,
                MatchRef::Node(node) if def.property_type.is_structured() => {
                    self.tree.splice_markup(node, &new_value)?
                }
                MatchRef::Node(node) => self.tree.set_element_text(node, &new_value)?,
            }
            changed = true;
        }
        Ok(changed)
    }

    /// Appends one audit fragment per edit record, newest first, leaving the
    /// original content in place. An attribute property's fragments attach to
    /// the owning element, an element property's to the element itself.
    pub fn enrich(&mut self, store: &StoreSession, document_id: i64) -> TokenResult<bool> {
        let mut changed = false;
        let properties: Vec<PropertyDefinition> = self.schema.properties().to_vec();
        for (idx, def) in properties.iter().enumerate() {
            let Some(hit) = self.resolved[idx] else {
                continue;
            };
            let owner = match hit {
                MatchRef::Attr(node, _) => node,
                MatchRef::Node(node) => node,
            };
            for edit in store.edits(document_id, def.selector.as_str(), self.id)? {
                let fs = self.tree.append_element(
                    owner,
                    "fs",
                    vec![("type".to_string(), "tokeneditor".to_string())],
                )?;
                self.append_feature(fs, "user", &edit.user_id)?;
                self.append_feature(fs, "date", &edit.date)?;
                self.append_feature(fs, "property_xpath", def.selector.as_str())?;
                if def.property_type.is_structured() {
                    let f = self.tree.append_element(
                        fs,
                        "f",
                        vec![("name".to_string(), "value".to_string())],
                    )?;
                    self.tree.splice_markup(f, &edit.value)?;
                } else {
                    self.append_feature(fs, "value", &edit.value)?;
                }
                changed = true;
            }
        }
        Ok(changed)
    }

    fn append_feature(&mut self, fs: NodeId, name: &str, value: &str) -> XmlResult<()> {
        let f = self
            .tree
            .append_element(fs, "f", vec![("name".to_string(), name.to_string())])?;
        let s = self.tree.append_element(f, "string", Vec::new())?;
        self.tree.append_text(s, value)?;
        Ok(())
    }

    /// Flattened record for tabular sinks: token id plus one entry per
    /// property. Plain mode carries the current value; audit mode carries the
    /// original value and the full edit history, newest first.
    pub fn flat_record(
        &self,
        store: &StoreSession,
        document_id: i64,
        audit: bool,
    ) -> TokenResult<Map<String, Value>> {
        let mut record = Map::new();
        record.insert("tokenId".to_string(), json!(self.id));
        for (idx, def) in self.schema.properties().iter().enumerate() {
            let selector = def.selector.as_str();
            let entry = if audit {
                let original = store.orig_value(document_id, selector, self.id)?;
                let edits: Vec<Value> = store
                    .edits(document_id, selector, self.id)?
                    .into_iter()
                    .map(|e| {
                        json!({"user": e.user_id, "date": e.date, "value": e.value})
                    })
                    .collect();
                json!({"original": original, "edits": edits})
            } else {
                match store.current_value(document_id, selector, self.id)? {
                    Some(value) => Value::String(value),
                    None => self.value(idx)?.map(Value::String).unwrap_or(Value::Null),
                }
            };
            record.insert(def.name.clone(), entry);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;

    const SCHEMA: &str = r#"<schema>
        <tokenXPath>//w</tokenXPath>
        <properties>
            <property>
                <propertyName>lemma</propertyName>
                <propertyXPath>@lemma</propertyXPath>
                <propertyType>free text</propertyType>
            </property>
            <property>
                <propertyName>type</propertyName>
                <propertyXPath>./type</propertyXPath>
                <propertyType>free text</propertyType>
                <optional/>
            </property>
            <property>
                <propertyName>txml</propertyName>
                <propertyXPath>./txml</propertyXPath>
                <propertyType>xml</propertyType>
                <optional/>
            </property>
        </properties>
    </schema>"#;

    fn schema() -> Rc<Schema> {
        Rc::new(Schema::from_xml(SCHEMA).unwrap())
    }

    fn token(markup: &str) -> Token {
        Token::new(1, parse_str(markup).unwrap(), schema()).unwrap()
    }

    fn store_with_token() -> StoreSession {
        let store = StoreSession::open_in_memory().unwrap();
        store
            .insert_document(1, "//w", "doc", "/tmp/1.xml", "h")
            .unwrap();
        store
    }

    #[test]
    fn test_value_extraction_modes() {
        let t = token("<w lemma=\"aaa\">Hi<type> bbb </type><txml>k<l>m</l>o</txml></w>");
        assert!(t.invalid_properties().is_empty());
        assert_eq!(t.value(0).unwrap().as_deref(), Some("aaa"));
        // element text is trimmed
        assert_eq!(t.value(1).unwrap().as_deref(), Some("bbb"));
        // structured properties keep inner markup
        assert_eq!(t.value(2).unwrap().as_deref(), Some("k<l>m</l>o"));
    }

    #[test]
    fn test_absent_optional_is_not_an_error() {
        let t = token("<w lemma=\"aaa\">Hi</w>");
        assert!(t.invalid_properties().is_empty());
        assert_eq!(t.value(1).unwrap(), None);
    }

    #[test]
    fn test_missing_required_is_deferred_until_save() {
        let t = token("<w>Hi</w>");
        assert_eq!(t.invalid_properties().len(), 1);
        assert_eq!(t.invalid_properties()[0].0, "lemma");

        let store = store_with_token();
        let err = t.save(&store, 1).unwrap_err();
        assert!(matches!(err, TokenError::PropertyMissing { token_id: 1, .. }));
        assert_eq!(store.token_count(1).unwrap(), 0);
    }

    #[test]
    fn test_multiple_matches_are_deferred() {
        let t = token("<w lemma=\"a\"><type>x</type><type>y</type></w>");
        assert_eq!(t.invalid_properties().len(), 1);
        assert_eq!(t.invalid_properties()[0].0, "type");
    }

    #[test]
    fn test_save_persists_original_values() {
        let store = store_with_token();
        let t = token("<w lemma=\"aaa\">Hi<type>bbb</type></w>");
        t.save(&store, 1).unwrap();
        assert_eq!(store.token_count(1).unwrap(), 1);
        assert_eq!(
            store.orig_value(1, "@lemma", 1).unwrap().as_deref(),
            Some("aaa")
        );
        assert_eq!(
            store.orig_value(1, "./type", 1).unwrap().as_deref(),
            Some("bbb")
        );
        // absent optional property stores no cell
        assert_eq!(store.orig_value(1, "./txml", 1).unwrap(), None);
    }

    #[test]
    fn test_update_writes_back_only_edited_cells() {
        let store = store_with_token();
        let mut t = token("<w lemma=\"aaa\">Hi<type>bbb</type></w>");
        t.save(&store, 1).unwrap();

        assert!(!t.update(&store, 1).unwrap());
        assert_eq!(t.markup(), "<w lemma=\"aaa\">Hi<type>bbb</type></w>");

        store.record_edit(1, "@lemma", 1, "u1", "ccc").unwrap();
        assert!(t.update(&store, 1).unwrap());
        assert_eq!(t.markup(), "<w lemma=\"ccc\">Hi<type>bbb</type></w>");
    }

    #[test]
    fn test_update_splices_structured_values() {
        let store = store_with_token();
        let mut t = token("<w lemma=\"a\"><txml>old</txml></w>");
        t.save(&store, 1).unwrap();
        store
            .record_edit(1, "./txml", 1, "u1", "k<l>m</l>n")
            .unwrap();
        assert!(t.update(&store, 1).unwrap());
        assert_eq!(t.markup(), "<w lemma=\"a\"><txml>k<l>m</l>n</txml></w>");
    }

    #[test]
    fn test_enrich_appends_audit_fragments() {
        let store = store_with_token();
        let mut t = token("<w lemma=\"aaa\">Hi</w>");
        t.save(&store, 1).unwrap();
        store
            .record_edit_at(1, "@lemma", 1, "u1", "bbb", "2024-01-01T00:00:00.000000Z")
            .unwrap();
        assert!(t.enrich(&store, 1).unwrap());
        assert_eq!(
            t.markup(),
            "<w lemma=\"aaa\">Hi<fs type=\"tokeneditor\">\
             <f name=\"user\"><string>u1</string></f>\
             <f name=\"date\"><string>2024-01-01T00:00:00.000000Z</string></f>\
             <f name=\"property_xpath\"><string>@lemma</string></f>\
             <f name=\"value\"><string>bbb</string></f></fs></w>"
        );
    }

    #[test]
    fn test_flat_record_plain_and_audit() {
        let store = store_with_token();
        let t = token("<w lemma=\"aaa\">Hi<type>bbb</type></w>");
        t.save(&store, 1).unwrap();
        store
            .record_edit_at(1, "@lemma", 1, "u1", "ccc", "2024-01-01T00:00:00.000000Z")
            .unwrap();

        let plain = t.flat_record(&store, 1, false).unwrap();
        assert_eq!(plain["tokenId"], json!(1));
        assert_eq!(plain["lemma"], json!("ccc"));
        assert_eq!(plain["type"], json!("bbb"));
        assert_eq!(plain["txml"], Value::Null);

        let audit = t.flat_record(&store, 1, true).unwrap();
        assert_eq!(audit["lemma"]["original"], json!("aaa"));
        assert_eq!(audit["lemma"]["edits"][0]["value"], json!("ccc"));
        assert_eq!(audit["type"]["edits"], json!([]));
    }
}
