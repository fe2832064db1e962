//! Relational strategy
//!
//! Stages the document text into the store's scratch table and pulls token
//! markup back out through the `xml_tokens` SQL function, keeping extraction
//! next to the data the way the original deployment ran XPath inside the
//! database. Import only: the strategy never reconstructs a document, so
//! replacement and export fail fast.

use std::path::Path;
use std::rc::Rc;

use crate::schema::Schema;
use crate::store::{StoreError, StoreSession};
use crate::token::Token;
use crate::xml::parse_str;

use super::errors::{IterResult, IteratorError};
use super::TokenIterator;

pub struct StoreIterator {
    store: Rc<StoreSession>,
    schema: Rc<Schema>,
    staging_id: i64,
    tokens: Vec<String>,
    pos: usize,
}

impl StoreIterator {
    pub fn new(path: &Path, schema: Rc<Schema>, store: Rc<StoreSession>) -> IterResult<StoreIterator> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml, schema, store)
    }

    pub fn from_xml(
        xml: &str,
        schema: Rc<Schema>,
        store: Rc<StoreSession>,
    ) -> IterResult<StoreIterator> {
        let ns_json = serde_json::to_string(schema.namespaces()).map_err(StoreError::from)?;
        let staging_id =
            store.stage_document(xml, schema.token_selector().as_str(), &ns_json)?;
        let tokens = store.staged_tokens(staging_id)?;
        Ok(StoreIterator {
            store,
            schema,
            staging_id,
            tokens,
            pos: 0,
        })
    }
}

impl TokenIterator for StoreIterator {
    fn rewind(&mut self) -> IterResult<()> {
        self.pos = 0;
        Ok(())
    }

    fn advance(&mut self) -> IterResult<Option<Token>> {
        let Some(markup) = self.tokens.get(self.pos) else {
            return Ok(None);
        };
        let tree = parse_str(markup)?;
        self.pos += 1;
        Ok(Some(Token::new(
            self.pos as i64,
            tree,
            self.schema.clone(),
        )?))
    }

    fn replace_token(&mut self, _token: &Token) -> IterResult<()> {
        Err(IteratorError::UnsupportedOperation("replace_token"))
    }

    fn export(&mut self, _path: Option<&Path>) -> IterResult<Option<String>> {
        Err(IteratorError::UnsupportedOperation("export"))
    }
}

impl Drop for StoreIterator {
    fn drop(&mut self) {
        // scratch row cleanup, nothing to report to
        let _ = self.store.clear_staged(self.staging_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<schema>
        <namespaces>
            <namespace><prefix>tei</prefix><uri>http://tei</uri></namespace>
        </namespaces>
        <tokenXPath>//tei:w</tokenXPath>
        <properties>
            <property>
                <propertyName>lemma</propertyName>
                <propertyXPath>@lemma</propertyXPath>
                <propertyType>free text</propertyType>
            </property>
        </properties>
    </schema>"#;

    fn setup(xml: &str) -> StoreIterator {
        let schema = Rc::new(Schema::from_xml(SCHEMA).unwrap());
        let store = Rc::new(StoreSession::open_in_memory().unwrap());
        StoreIterator::from_xml(xml, schema, store).unwrap()
    }

    #[test]
    fn test_tokens_resolve_namespaced_properties() {
        let mut it = setup(
            "<r xmlns=\"http://tei\"><w lemma=\"a\">x</w><w lemma=\"b\">y</w></r>",
        );
        let t1 = it.advance().unwrap().unwrap();
        assert_eq!(t1.id(), 1);
        assert_eq!(t1.value(0).unwrap().as_deref(), Some("a"));
        let t2 = it.advance().unwrap().unwrap();
        assert_eq!(t2.id(), 2);
        assert!(it.advance().unwrap().is_none());
    }

    #[test]
    fn test_mutations_are_rejected() {
        let mut it = setup("<r xmlns=\"http://tei\"><w lemma=\"a\">x</w></r>");
        let t = it.advance().unwrap().unwrap();
        assert!(matches!(
            it.replace_token(&t),
            Err(IteratorError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            it.export(None),
            Err(IteratorError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_scratch_row_removed_on_drop() {
        let schema = Rc::new(Schema::from_xml(SCHEMA).unwrap());
        let store = Rc::new(StoreSession::open_in_memory().unwrap());
        let it = StoreIterator::from_xml(
            "<r xmlns=\"http://tei\"><w lemma=\"a\">x</w></r>",
            schema,
            store.clone(),
        )
        .unwrap();
        let staged: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM import_tmp", [], |r| r.get(0))
            .unwrap();
        assert_eq!(staged, 1);
        drop(it);
        let staged: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM import_tmp", [], |r| r.get(0))
            .unwrap();
        assert_eq!(staged, 0);
    }
}
