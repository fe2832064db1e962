//! Event-stream tree building
//!
//! The builder consumes quick-xml events together with each event's exact
//! textual rendering, accumulating the rendering as the tree's source so that
//! every node's span points at verbatim input text. The same builder serves
//! whole-document parsing and the streaming iterator's per-token subtree
//! materialization (which starts from a non-empty ancestor namespace scope).

use std::rc::Rc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{
    resolve_attr_qname, resolve_qname, Attr, Element, NodeId, NsScope, Src, XmlError, XmlNode,
    XmlResult, XmlTree,
};

/// Exact textual form of an event, reconstructed per event kind.
pub(crate) fn event_raw(ev: &Event) -> XmlResult<String> {
    let raw = match ev {
        Event::Start(e) => format!("<{}>", std::str::from_utf8(e.as_ref())?),
        Event::Empty(e) => format!("<{}/>", std::str::from_utf8(e.as_ref())?),
        Event::End(e) => format!("</{}>", std::str::from_utf8(e.as_ref())?),
        Event::Text(e) => std::str::from_utf8(e.as_ref())?.to_string(),
        Event::CData(e) => format!("<![CDATA[{}]]>", std::str::from_utf8(e.as_ref())?),
        Event::Comment(e) => format!("<!--{}-->", std::str::from_utf8(e.as_ref())?),
        Event::PI(e) => format!("<?{}?>", std::str::from_utf8(e.as_ref())?),
        Event::DocType(e) => format!("<!DOCTYPE {}>", std::str::from_utf8(e.as_ref())?),
        Event::Decl(e) => format!("<?{}?>", std::str::from_utf8(e.as_ref())?),
        Event::Eof => String::new(),
    };
    Ok(raw)
}

/// Incremental tree builder over (event, raw text) pairs
pub struct TreeBuilder {
    tree: XmlTree,
    src: String,
    stack: Vec<(NodeId, usize)>,
    scopes: Vec<Rc<NsScope>>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::with_scope(Rc::new(NsScope::new()))
    }

    /// Starts from an inherited namespace scope (subtree materialization).
    pub fn with_scope(scope: Rc<NsScope>) -> Self {
        TreeBuilder {
            tree: XmlTree::empty(),
            src: String::new(),
            stack: Vec::new(),
            scopes: vec![scope],
        }
    }

    /// True once at least one root is closed and no element remains open.
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && !self.tree.roots.is_empty()
    }

    pub fn push(&mut self, ev: &Event) -> XmlResult<()> {
        let raw = event_raw(ev)?;
        let start = self.src.len();
        self.src.push_str(&raw);
        let span = Src::Span(start, self.src.len());

        match ev {
            Event::Start(e) => {
                let element = self.build_element(e, Some(span), false)?;
                let id = self.attach(XmlNode::Element(element));
                self.stack.push((id, start));
                let scope = match &self.tree.nodes[id] {
                    XmlNode::Element(el) => el.scope.clone(),
                    _ => unreachable!(),
                };
                self.scopes.push(scope);
            }
            Event::Empty(e) => {
                let mut element = self.build_element(e, Some(span.clone()), true)?;
                element.raw = Some(span);
                self.attach(XmlNode::Element(element));
            }
            Event::End(_) => {
                let (id, start_off) = self
                    .stack
                    .pop()
                    .ok_or_else(|| XmlError::Parse("unexpected close tag".into()))?;
                if let XmlNode::Element(el) = &mut self.tree.nodes[id] {
                    el.raw = Some(Src::Span(start_off, self.src.len()));
                }
                self.scopes.pop();
            }
            Event::Text(_) => {
                self.attach(XmlNode::Text(span));
            }
            Event::CData(e) => {
                let content = std::str::from_utf8(e.as_ref())?.to_string();
                self.attach(XmlNode::CData(Src::Owned(content)));
            }
            Event::Comment(e) => {
                let content = std::str::from_utf8(e.as_ref())?.to_string();
                self.attach(XmlNode::Comment(Src::Owned(content)));
            }
            Event::PI(e) => {
                let content = std::str::from_utf8(e.as_ref())?.to_string();
                self.attach(XmlNode::Pi(Src::Owned(content)));
            }
            Event::DocType(e) => {
                let content = std::str::from_utf8(e.as_ref())?.to_string();
                self.attach(XmlNode::DocType(Src::Owned(content)));
            }
            // the prolog is normalized on export, never stored
            Event::Decl(_) | Event::Eof => {}
        }
        Ok(())
    }

    pub fn finish(mut self) -> XmlResult<XmlTree> {
        if !self.stack.is_empty() {
            return Err(XmlError::Parse("unclosed element".into()));
        }
        self.tree.source = Rc::from(self.src);
        Ok(self.tree)
    }

    fn attach(&mut self, node: XmlNode) -> NodeId {
        let parent = self.stack.last().map(|&(id, _)| id);
        let id = self.tree.push_node(node, parent);
        match parent {
            Some(p) => {
                if let XmlNode::Element(el) = &mut self.tree.nodes[p] {
                    el.children.push(id);
                }
            }
            None => self.tree.roots.push(id),
        }
        id
    }

    fn build_element(
        &self,
        e: &BytesStart,
        raw_start: Option<Src>,
        self_closing: bool,
    ) -> XmlResult<Element> {
        let qname = std::str::from_utf8(e.name().as_ref())?.to_string();
        let parent_scope = self.scopes.last().cloned().unwrap_or_default();

        let mut raw_attrs: Vec<(String, String)> = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            raw_attrs.push((key, value));
        }

        let scope = merge_scope(&parent_scope, &raw_attrs);
        let (local, ns) = resolve_qname(&qname, &scope);
        let attrs = raw_attrs
            .into_iter()
            .map(|(qname, value)| {
                let (local, ns) = resolve_attr_qname(&qname, &scope);
                Attr { qname, local, ns, value }
            })
            .collect();

        Ok(Element {
            qname,
            local,
            ns,
            attrs,
            children: Vec::new(),
            scope,
            raw: None,
            raw_start,
            self_closing,
        })
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds any `xmlns`/`xmlns:prefix` declarations among `attrs` into a child
/// scope of `parent`. Returns the parent scope unchanged (shared) when the
/// element declares nothing.
pub(crate) fn merge_scope(parent: &Rc<NsScope>, attrs: &[(String, String)]) -> Rc<NsScope> {
    let mut merged: Option<NsScope> = None;
    for (key, value) in attrs {
        let prefix = if key == "xmlns" {
            Some(String::new())
        } else {
            key.strip_prefix("xmlns:").map(str::to_string)
        };
        if let Some(prefix) = prefix {
            merged
                .get_or_insert_with(|| (**parent).clone())
                .insert(prefix, value.clone());
        }
    }
    match merged {
        Some(scope) => Rc::new(scope),
        None => parent.clone(),
    }
}

/// Parses a whole document. The XML declaration, if any, is dropped; export
/// paths write a normalized prolog of their own.
pub fn parse_str(input: &str) -> XmlResult<XmlTree> {
    let mut reader = Reader::from_str(input);
    let mut builder = TreeBuilder::new();
    loop {
        let ev = reader.read_event()?;
        if matches!(ev, Event::Eof) {
            break;
        }
        builder.push(&ev)?;
    }
    builder.finish()
}

/// Parses a markup fragment inside the given namespace scope. The returned
/// tree's root element is a synthetic wrapper; the fragment's nodes are its
/// children.
pub fn parse_fragment(markup: &str, scope: &NsScope) -> XmlResult<XmlTree> {
    let mut wrapped = String::from("<annotok-fragment");
    for (prefix, uri) in scope {
        if prefix.is_empty() {
            wrapped.push_str(" xmlns=\"");
        } else {
            wrapped.push_str(" xmlns:");
            wrapped.push_str(prefix);
            wrapped.push_str("=\"");
        }
        wrapped.push_str(&super::escape_attr(uri));
        wrapped.push('"');
    }
    wrapped.push('>');
    wrapped.push_str(markup);
    wrapped.push_str("</annotok-fragment>");
    parse_str(&wrapped)
}
