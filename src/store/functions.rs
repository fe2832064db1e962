//! Custom SQL functions
//!
//! The relational iterator strategy selects token markup inside SQL. SQLite
//! has no XML support of its own, so the session registers `xml_tokens(xml,
//! selector, ns_json)`: it decomposes the document text with the same tree
//! and selector machinery the other strategies use and returns the token
//! subtrees as a JSON array of markup strings, ready for `json_each`.

use std::collections::BTreeMap;

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

use crate::xml::{parse_str, MatchRef, Selector};

pub(super) fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "xml_tokens",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| xml_tokens(ctx).map_err(rusqlite::Error::UserFunctionError),
    )
}

fn xml_tokens(ctx: &Context) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let xml: String = ctx.get(0)?;
    let selector: String = ctx.get(1)?;
    let ns_json: String = ctx.get(2)?;

    let selector = Selector::parse(&selector)?;
    let namespaces: BTreeMap<String, String> = serde_json::from_str(&ns_json)?;
    let tree = parse_str(&xml)?;
    let root = tree
        .root_element()
        .ok_or("document has no root element")?;

    let mut tokens = Vec::new();
    for hit in selector.eval(&tree, root, &namespaces) {
        if let MatchRef::Node(id) = hit {
            // the subtree leaves its document, so inherited namespace
            // bindings must travel with it
            let mut subtree = tree.extract_subtree(id);
            if let Some(sub_root) = subtree.root_element() {
                subtree.declare_namespaces(sub_root)?;
            }
            tokens.push(subtree.serialize());
        }
    }
    Ok(serde_json::to_string(&tokens)?)
}
