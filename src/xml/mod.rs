//! Minimal XML tree with byte-exact reconstruction
//!
//! The annotation model must reproduce untouched document regions
//! byte-for-byte on export, which rules out a general-purpose serializer.
//! Every node parsed from input therefore remembers its exact source text;
//! mutation invalidates the remembered text of exactly the touched node and
//! its ancestors, so serialization falls back to canonical rendering only
//! where an edit actually happened.
//!
//! The tree is an arena: nodes are addressed by `NodeId` and own their
//! children by id. Subtrees can be extracted into standalone trees (tokens)
//! and spliced back, preserving raw text across the move.

mod errors;
mod parse;
mod select;
mod serialize;

pub use errors::{SelectorError, XmlError, XmlResult};
pub use parse::{parse_fragment, parse_str, TreeBuilder};
pub(crate) use parse::{event_raw, merge_scope};
pub use select::{MatchRef, Selector, Step};
pub use serialize::{escape_attr, escape_text};

use std::collections::BTreeMap;
use std::rc::Rc;

/// Index of a node inside its owning [`XmlTree`]
pub type NodeId = usize;

/// In-scope namespace declarations, prefix to URI. The empty-string key holds
/// the default namespace.
pub type NsScope = BTreeMap<String, String>;

/// Source text of a node: either a span into the tree's original source or an
/// owned string (synthetic nodes, nodes imported across trees).
#[derive(Debug, Clone)]
pub(crate) enum Src {
    Span(usize, usize),
    Owned(String),
}

/// One attribute of an element. `value` is stored unescaped.
#[derive(Debug, Clone)]
pub struct Attr {
    pub qname: String,
    pub local: String,
    pub ns: Option<String>,
    pub value: String,
}

/// An element node
#[derive(Debug, Clone)]
pub struct Element {
    pub qname: String,
    pub local: String,
    pub ns: Option<String>,
    pub attrs: Vec<Attr>,
    pub children: Vec<NodeId>,
    pub(crate) scope: Rc<NsScope>,
    /// Exact source text of the whole subtree; cleared on any mutation below.
    pub(crate) raw: Option<Src>,
    /// Exact source text of the start tag; cleared when attributes change.
    pub(crate) raw_start: Option<Src>,
    pub(crate) self_closing: bool,
}

/// Any node kind the parser preserves. Non-element payloads hold the literal
/// content between the kind's delimiters (text stays in escaped form).
#[derive(Debug, Clone)]
pub(crate) enum XmlNode {
    Element(Element),
    Text(Src),
    Comment(Src),
    CData(Src),
    Pi(Src),
    DocType(Src),
}

/// Arena XML tree
#[derive(Debug, Clone)]
pub struct XmlTree {
    pub(crate) source: Rc<str>,
    pub(crate) nodes: Vec<XmlNode>,
    pub(crate) parents: Vec<Option<NodeId>>,
    pub(crate) roots: Vec<NodeId>,
}

impl XmlTree {
    pub(crate) fn empty() -> Self {
        XmlTree {
            source: Rc::from(""),
            nodes: Vec::new(),
            parents: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id]
    }

    pub fn element(&self, id: NodeId) -> XmlResult<&Element> {
        match &self.nodes[id] {
            XmlNode::Element(el) => Ok(el),
            _ => Err(XmlError::NotAnElement(id)),
        }
    }

    fn element_mut(&mut self, id: NodeId) -> XmlResult<&mut Element> {
        match &mut self.nodes[id] {
            XmlNode::Element(el) => Ok(el),
            _ => Err(XmlError::NotAnElement(id)),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id]
    }

    /// First root-level element (the document element).
    pub fn root_element(&self) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id], XmlNode::Element(_)))
    }

    pub(crate) fn src_str<'a>(&'a self, src: &'a Src) -> &'a str {
        match src {
            Src::Span(start, end) => &self.source[*start..*end],
            Src::Owned(s) => s,
        }
    }

    /// Concatenated unescaped character data of the node and its descendants.
    pub fn text_value(&self, id: NodeId) -> XmlResult<String> {
        let mut out = String::new();
        self.collect_text(id, &mut out)?;
        Ok(out)
    }

    fn collect_text(&self, id: NodeId, out: &mut String) -> XmlResult<()> {
        match &self.nodes[id] {
            XmlNode::Text(src) => {
                out.push_str(&quick_xml::escape::unescape(self.src_str(src))?);
            }
            XmlNode::CData(src) => out.push_str(self.src_str(src)),
            XmlNode::Element(el) => {
                for child in el.children.clone() {
                    self.collect_text(child, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Serialized markup of the element's children, raw where untouched.
    pub fn inner_markup(&self, id: NodeId) -> XmlResult<String> {
        let el = self.element(id)?;
        let mut out = String::new();
        for &child in &el.children {
            serialize::serialize_node(self, child, &mut out);
        }
        Ok(out)
    }

    /// Serialized markup of the node itself (outer XML).
    pub fn outer_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        serialize::serialize_node(self, id, &mut out);
        out
    }

    /// Serializes every root-level node in order, without a prolog.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            serialize::serialize_node(self, root, &mut out);
        }
        out
    }

    pub fn attr_value(&self, id: NodeId, attr: usize) -> XmlResult<&str> {
        Ok(&self.element(id)?.attrs[attr].value)
    }

    /// Invalidates remembered source text from `id` up to the root.
    fn mark_dirty(&mut self, id: NodeId) {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let XmlNode::Element(el) = &mut self.nodes[n] {
                el.raw = None;
                if el.self_closing {
                    // a former empty element now renders in full form
                    el.raw_start = None;
                    el.self_closing = false;
                }
            }
            cur = self.parents[n];
        }
    }

    /// Assigns an attribute value. The start tag re-renders canonically, the
    /// attribute order is preserved.
    pub fn set_attr_value(&mut self, id: NodeId, attr: usize, value: &str) -> XmlResult<()> {
        {
            let el = self.element_mut(id)?;
            el.attrs[attr].value = value.to_string();
            el.raw_start = None;
        }
        self.mark_dirty(id);
        Ok(())
    }

    /// Makes the element's inherited namespace scope explicit by adding
    /// `xmlns` attributes for every in-scope binding it does not declare
    /// itself. Used when a subtree leaves its document (the markup must stay
    /// resolvable on its own); the start tag re-renders canonically.
    pub fn declare_namespaces(&mut self, id: NodeId) -> XmlResult<()> {
        let mut to_add = Vec::new();
        {
            let el = self.element(id)?;
            for (prefix, uri) in el.scope.iter() {
                if uri.is_empty() {
                    continue;
                }
                let qname = if prefix.is_empty() {
                    "xmlns".to_string()
                } else {
                    format!("xmlns:{}", prefix)
                };
                if !el.attrs.iter().any(|a| a.qname == qname) {
                    to_add.push((qname, uri.clone()));
                }
            }
        }
        if to_add.is_empty() {
            return Ok(());
        }
        {
            let el = self.element_mut(id)?;
            for (qname, value) in to_add {
                el.attrs.push(Attr {
                    local: qname.clone(),
                    qname,
                    ns: None,
                    value,
                });
            }
            el.raw_start = None;
        }
        self.mark_dirty(id);
        Ok(())
    }

    /// Replaces the element's entire content with a single text node.
    pub fn set_element_text(&mut self, id: NodeId, text: &str) -> XmlResult<()> {
        let text_node = self.push_node(
            XmlNode::Text(Src::Owned(escape_text(text))),
            Some(id),
        );
        self.element_mut(id)?.children = vec![text_node];
        self.mark_dirty(id);
        Ok(())
    }

    /// Replaces the element's content with parsed markup, resolved in the
    /// element's own namespace scope.
    pub fn splice_markup(&mut self, id: NodeId, markup: &str) -> XmlResult<()> {
        let scope = self.element(id)?.scope.clone();
        let fragment = parse_fragment(markup, &scope)?;
        let frag_root = fragment
            .root_element()
            .ok_or_else(|| XmlError::Parse("empty markup fragment".into()))?;
        let children: Vec<NodeId> = fragment.element(frag_root)?.children.clone();
        let mut imported = Vec::with_capacity(children.len());
        for child in children {
            let new_id = self.import_subtree(&fragment, child, Some(id));
            imported.push(new_id);
        }
        self.element_mut(id)?.children = imported;
        self.mark_dirty(id);
        Ok(())
    }

    /// Appends a synthetic element (no raw text, canonical rendering).
    pub fn append_element(
        &mut self,
        parent: NodeId,
        qname: &str,
        attrs: Vec<(String, String)>,
    ) -> XmlResult<NodeId> {
        let scope = self.element(parent)?.scope.clone();
        let (local, ns) = resolve_qname(qname, &scope);
        let element = Element {
            qname: qname.to_string(),
            local,
            ns,
            attrs: attrs
                .into_iter()
                .map(|(qname, value)| {
                    let (local, ns) = resolve_attr_qname(&qname, &scope);
                    Attr { qname, local, ns, value }
                })
                .collect(),
            children: Vec::new(),
            scope,
            raw: None,
            raw_start: None,
            self_closing: false,
        };
        let id = self.push_node(XmlNode::Element(element), Some(parent));
        self.element_mut(parent)?.children.push(id);
        self.mark_dirty(parent);
        Ok(id)
    }

    /// Appends a synthetic text node.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> XmlResult<NodeId> {
        let id = self.push_node(XmlNode::Text(Src::Owned(escape_text(text))), Some(parent));
        self.element_mut(parent)?.children.push(id);
        self.mark_dirty(parent);
        Ok(id)
    }

    /// Deep-copies a subtree of another tree into this one, materializing
    /// source spans as owned text so raw fidelity survives the move.
    pub fn import_subtree(
        &mut self,
        other: &XmlTree,
        node: NodeId,
        parent: Option<NodeId>,
    ) -> NodeId {
        let owned = |src: &Option<Src>| -> Option<Src> {
            src.as_ref()
                .map(|s| Src::Owned(other.src_str(s).to_string()))
        };
        let cloned = match &other.nodes[node] {
            XmlNode::Element(el) => XmlNode::Element(Element {
                qname: el.qname.clone(),
                local: el.local.clone(),
                ns: el.ns.clone(),
                attrs: el.attrs.clone(),
                children: Vec::new(),
                scope: el.scope.clone(),
                raw: owned(&el.raw),
                raw_start: owned(&el.raw_start),
                self_closing: el.self_closing,
            }),
            XmlNode::Text(s) => XmlNode::Text(Src::Owned(other.src_str(s).to_string())),
            XmlNode::Comment(s) => XmlNode::Comment(Src::Owned(other.src_str(s).to_string())),
            XmlNode::CData(s) => XmlNode::CData(Src::Owned(other.src_str(s).to_string())),
            XmlNode::Pi(s) => XmlNode::Pi(Src::Owned(other.src_str(s).to_string())),
            XmlNode::DocType(s) => XmlNode::DocType(Src::Owned(other.src_str(s).to_string())),
        };
        let id = self.push_node(cloned, parent);
        if let XmlNode::Element(el) = &other.nodes[node] {
            let mut children = Vec::with_capacity(el.children.len());
            for &child in &el.children {
                children.push(self.import_subtree(other, child, Some(id)));
            }
            if let XmlNode::Element(el) = &mut self.nodes[id] {
                el.children = children;
            }
        }
        id
    }

    /// Extracts a subtree into a standalone tree whose single root is the
    /// given node.
    pub fn extract_subtree(&self, node: NodeId) -> XmlTree {
        let mut tree = XmlTree::empty();
        let root = tree.import_subtree(self, node, None);
        tree.roots.push(root);
        tree
    }

    /// Replaces `old` (which must have a parent) with a subtree imported from
    /// another tree. Returns the id of the replacement.
    pub fn replace_subtree(
        &mut self,
        old: NodeId,
        other: &XmlTree,
        replacement: NodeId,
    ) -> XmlResult<NodeId> {
        let parent = self.parents[old]
            .ok_or_else(|| XmlError::Parse("cannot replace the document root".into()))?;
        let new_id = self.import_subtree(other, replacement, Some(parent));
        let slot = {
            let el = self.element(parent)?;
            el.children
                .iter()
                .position(|&c| c == old)
                .ok_or_else(|| XmlError::Parse("stale node reference".into()))?
        };
        self.element_mut(parent)?.children[slot] = new_id;
        self.mark_dirty(parent);
        Ok(new_id)
    }

    pub(crate) fn push_node(&mut self, node: XmlNode, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.parents.push(parent);
        id
    }
}

pub(crate) fn resolve_qname(qname: &str, scope: &NsScope) -> (String, Option<String>) {
    match qname.split_once(':') {
        Some((prefix, local)) => (local.to_string(), scope.get(prefix).cloned()),
        None => (
            qname.to_string(),
            scope.get("").filter(|uri| !uri.is_empty()).cloned(),
        ),
    }
}

// Unprefixed attributes never take the default namespace.
pub(crate) fn resolve_attr_qname(qname: &str, scope: &NsScope) -> (String, Option<String>) {
    match qname.split_once(':') {
        Some((prefix, local)) => (local.to_string(), scope.get(prefix).cloned()),
        None => (qname.to_string(), None),
    }
}
