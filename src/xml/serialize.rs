//! Rendering of tree nodes back to XML text
//!
//! Nodes that still carry their source text are emitted verbatim; everything
//! else renders canonically (double-quoted attributes, minimal escaping).

use super::{XmlNode, XmlTree};

pub(crate) fn serialize_node(tree: &XmlTree, id: usize, out: &mut String) {
    match tree.node(id) {
        XmlNode::Element(el) => {
            if let Some(raw) = &el.raw {
                out.push_str(tree.src_str(raw));
                return;
            }
            match &el.raw_start {
                Some(raw_start) => out.push_str(tree.src_str(raw_start)),
                None => {
                    out.push('<');
                    out.push_str(&el.qname);
                    for attr in &el.attrs {
                        out.push(' ');
                        out.push_str(&attr.qname);
                        out.push_str("=\"");
                        out.push_str(&escape_attr(&attr.value));
                        out.push('"');
                    }
                    if el.children.is_empty() {
                        out.push_str("/>");
                        return;
                    }
                    out.push('>');
                }
            }
            for &child in &el.children {
                serialize_node(tree, child, out);
            }
            out.push_str("</");
            out.push_str(&el.qname);
            out.push('>');
        }
        XmlNode::Text(src) => out.push_str(tree.src_str(src)),
        XmlNode::Comment(src) => {
            out.push_str("<!--");
            out.push_str(tree.src_str(src));
            out.push_str("-->");
        }
        XmlNode::CData(src) => {
            out.push_str("<![CDATA[");
            out.push_str(tree.src_str(src));
            out.push_str("]]>");
        }
        XmlNode::Pi(src) => {
            out.push_str("<?");
            out.push_str(tree.src_str(src));
            out.push_str("?>");
        }
        XmlNode::DocType(src) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(tree.src_str(src));
            out.push('>');
        }
    }
}

/// Escapes character data for element content.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes an attribute value for double-quoted rendering.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
