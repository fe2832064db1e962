//! Whole-tree strategy
//!
//! Parses the entire document into an [`XmlTree`] and evaluates the token
//! selector against it, so any selector shape the evaluator accepts works,
//! predicates included. Token replacement splices the edited subtree in
//! place; export serializes the whole tree, raw text intact wherever nothing
//! was touched.

use std::path::Path;
use std::rc::Rc;

use crate::schema::Schema;
use crate::token::Token;
use crate::xml::{parse_str, MatchRef, NodeId, XmlError, XmlTree};

use super::errors::{IterResult, IteratorError};
use super::{TokenIterator, XML_PROLOG};

pub struct TreeIterator {
    tree: XmlTree,
    schema: Rc<Schema>,
    token_nodes: Vec<NodeId>,
    pos: usize,
    current: Option<(i64, NodeId)>,
}

impl TreeIterator {
    pub fn new(path: &Path, schema: Rc<Schema>) -> IterResult<TreeIterator> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml, schema)
    }

    pub fn from_xml(xml: &str, schema: Rc<Schema>) -> IterResult<TreeIterator> {
        let selector = schema.token_selector();
        if selector.is_attribute_path() {
            return Err(IteratorError::UnsupportedSelector(
                selector.as_str().to_string(),
            ));
        }
        let tree = parse_str(xml)?;
        let root = tree
            .root_element()
            .ok_or_else(|| XmlError::Parse("document has no root element".into()))?;
        let token_nodes = selector
            .eval(&tree, root, schema.namespaces())
            .into_iter()
            .filter_map(|hit| match hit {
                MatchRef::Node(id) => Some(id),
                MatchRef::Attr(..) => None,
            })
            .collect();
        Ok(TreeIterator {
            tree,
            schema,
            token_nodes,
            pos: 0,
            current: None,
        })
    }
}

impl TokenIterator for TreeIterator {
    fn rewind(&mut self) -> IterResult<()> {
        self.pos = 0;
        self.current = None;
        Ok(())
    }

    fn advance(&mut self) -> IterResult<Option<Token>> {
        let Some(&node) = self.token_nodes.get(self.pos) else {
            self.current = None;
            return Ok(None);
        };
        self.pos += 1;
        let id = self.pos as i64;
        self.current = Some((id, node));
        let subtree = self.tree.extract_subtree(node);
        Ok(Some(Token::new(id, subtree, self.schema.clone())?))
    }

    fn replace_token(&mut self, token: &Token) -> IterResult<()> {
        let Some((id, node)) = self.current else {
            return Err(IteratorError::NoCurrentToken);
        };
        if token.id() != id {
            return Err(IteratorError::TokenMismatch {
                expected: id,
                got: token.id(),
            });
        }
        let new_node = self
            .tree
            .replace_subtree(node, token.tree(), token.root())?;
        self.current = Some((id, new_node));
        self.token_nodes[self.pos - 1] = new_node;
        Ok(())
    }

    fn export(&mut self, path: Option<&Path>) -> IterResult<Option<String>> {
        let mut out = String::from(XML_PROLOG);
        out.push_str(&self.tree.serialize());
        match path {
            Some(dest) => {
                std::fs::write(dest, out)?;
                Ok(None)
            }
            None => Ok(Some(out)),
        }
    }
}
