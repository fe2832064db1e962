//! Restricted, namespace-aware selector paths
//!
//! The schema locates tokens and properties with selector paths. Full XPath
//! over a tree is out of reach for the streaming strategy and unnecessary for
//! the corpora this model serves, so the grammar is deliberately small:
//!
//! ```text
//! selector  = ["./" | ".//" | "/" | "//"] step (("/" | "//") step)*
//! step      = "@" qname
//!           | ("*" | qname) predicate*
//! predicate = "[" number "]"            1-based position
//!           | "[@" qname "=" quoted "]" attribute equality
//! ```
//!
//! A leading `/` or `//` makes the path absolute (document root context);
//! everything else resolves relative to the context element. `//` between
//! steps selects descendants. An attribute step is only valid in final
//! position. Prefixes resolve through the schema's namespace bindings;
//! an unbound prefix degrades to a literal qualified-name match.

use std::collections::BTreeSet;

use super::{Attr, Element, NodeId, NsScope, SelectorError, XmlNode, XmlTree};

/// A resolved selector match: an element node or one of its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRef {
    Node(NodeId),
    Attr(NodeId, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Wildcard,
    Element { prefix: Option<String>, local: String },
    Attribute { prefix: Option<String>, local: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Position(usize),
    AttrEquals {
        prefix: Option<String>,
        local: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub descendant: bool,
    pub test: NodeTest,
    pub predicates: Vec<Predicate>,
}

/// A parsed selector path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    raw: String,
    absolute: bool,
    steps: Vec<Step>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Selector, SelectorError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(SelectorError::Empty);
        }

        let (absolute, first_descendant, rest) = if let Some(r) = raw.strip_prefix(".//") {
            (false, true, r)
        } else if let Some(r) = raw.strip_prefix("./") {
            (false, false, r)
        } else if let Some(r) = raw.strip_prefix("//") {
            (true, true, r)
        } else if let Some(r) = raw.strip_prefix('/') {
            (true, false, r)
        } else {
            (false, false, raw)
        };
        if rest.is_empty() {
            return Err(SelectorError::Syntax(raw.to_string()));
        }

        let mut steps = Vec::new();
        let mut descendant = first_descendant;
        let mut cursor = rest;
        loop {
            let split = step_boundary(cursor);
            let (step_str, tail) = cursor.split_at(split);
            steps.push(parse_step(step_str, descendant)?);
            if tail.is_empty() {
                break;
            }
            if let Some(t) = tail.strip_prefix("//") {
                descendant = true;
                cursor = t;
            } else {
                descendant = false;
                cursor = &tail[1..];
            }
            if cursor.is_empty() {
                return Err(SelectorError::Syntax(raw.to_string()));
            }
        }

        for (i, step) in steps.iter().enumerate() {
            if matches!(step.test, NodeTest::Attribute { .. }) && i + 1 != steps.len() {
                return Err(SelectorError::AttributeNotLast(raw.to_string()));
            }
        }

        Ok(Selector {
            raw: raw.to_string(),
            absolute,
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the final step selects attributes rather than elements.
    pub fn is_attribute_path(&self) -> bool {
        matches!(
            self.steps.last().map(|s| &s.test),
            Some(NodeTest::Attribute { .. })
        )
    }

    /// The single `(prefix, local)` of a selector shaped `//name`, the only
    /// form the streaming strategy can evaluate.
    pub fn as_streamable_name(&self) -> Option<(Option<&str>, &str)> {
        if !self.absolute || self.steps.len() != 1 {
            return None;
        }
        let step = &self.steps[0];
        if !step.descendant || !step.predicates.is_empty() {
            return None;
        }
        match &step.test {
            NodeTest::Element { prefix, local } => Some((prefix.as_deref(), local)),
            _ => None,
        }
    }

    /// Evaluates against `ctx` (ignored for absolute paths), resolving
    /// prefixes through `ns`. Results come back in document order without
    /// duplicates.
    pub fn eval(&self, tree: &XmlTree, ctx: NodeId, ns: &NsScope) -> Vec<MatchRef> {
        let mut contexts: Vec<NodeId> = Vec::new();
        let mut first = true;
        for step in &self.steps {
            if let NodeTest::Attribute { prefix, local } = &step.test {
                // final step (validated at parse time); a leading attribute
                // step reads the context element itself, not its children
                let elements = if first {
                    if self.absolute {
                        self.initial_elements(tree, ctx, step.descendant)
                    } else if step.descendant {
                        let mut all = vec![ctx];
                        all.extend(descendant_elements(tree, ctx));
                        all
                    } else {
                        vec![ctx]
                    }
                } else {
                    std::mem::take(&mut contexts)
                };
                let mut out = Vec::new();
                for el_id in elements {
                    if let XmlNode::Element(el) = tree.node(el_id) {
                        for (i, attr) in el.attrs.iter().enumerate() {
                            if attr_matches(attr, prefix.as_deref(), local, ns) {
                                out.push(MatchRef::Attr(el_id, i));
                            }
                        }
                    }
                }
                return out;
            }

            let candidates_per_ctx: Vec<Vec<NodeId>> = if first {
                vec![self.initial_elements(tree, ctx, step.descendant)]
            } else {
                contexts
                    .iter()
                    .map(|&c| {
                        if step.descendant {
                            descendant_elements(tree, c)
                        } else {
                            child_elements(tree, c)
                        }
                    })
                    .collect()
            };
            first = false;

            let mut next = Vec::new();
            let mut seen = BTreeSet::new();
            for candidates in candidates_per_ctx {
                let mut matched: Vec<NodeId> = candidates
                    .into_iter()
                    .filter(|&id| match tree.node(id) {
                        XmlNode::Element(el) => element_matches(el, &step.test, ns),
                        _ => false,
                    })
                    .collect();
                for pred in &step.predicates {
                    matched = apply_predicate(tree, matched, pred, ns);
                }
                for id in matched {
                    if seen.insert(id) {
                        next.push(id);
                    }
                }
            }
            contexts = next;
        }

        contexts.into_iter().map(MatchRef::Node).collect()
    }

    fn initial_elements(&self, tree: &XmlTree, ctx: NodeId, descendant: bool) -> Vec<NodeId> {
        if self.absolute {
            let roots: Vec<NodeId> = tree
                .roots
                .iter()
                .copied()
                .filter(|&id| matches!(tree.node(id), XmlNode::Element(_)))
                .collect();
            if descendant {
                let mut all = Vec::new();
                for root in roots {
                    all.push(root);
                    all.extend(descendant_elements(tree, root));
                }
                all
            } else {
                roots
            }
        } else if descendant {
            descendant_elements(tree, ctx)
        } else {
            child_elements(tree, ctx)
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Byte offset of the `/` separating the first step from the rest, skipping
/// bracketed predicates and quoted strings.
fn step_boundary(s: &str) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => return i,
            _ => {}
        }
    }
    s.len()
}

fn parse_step(s: &str, descendant: bool) -> Result<Step, SelectorError> {
    if let Some(attr) = s.strip_prefix('@') {
        let (prefix, local) = split_qname(attr).ok_or_else(|| SelectorError::Syntax(s.into()))?;
        return Ok(Step {
            descendant,
            test: NodeTest::Attribute { prefix, local },
            predicates: Vec::new(),
        });
    }

    let name_end = s.find('[').unwrap_or(s.len());
    let (name, mut preds_str) = s.split_at(name_end);
    let test = if name == "*" {
        NodeTest::Wildcard
    } else {
        let (prefix, local) = split_qname(name).ok_or_else(|| SelectorError::Syntax(s.into()))?;
        NodeTest::Element { prefix, local }
    };

    let mut predicates = Vec::new();
    while !preds_str.is_empty() {
        if !preds_str.starts_with('[') {
            return Err(SelectorError::Syntax(s.into()));
        }
        let close = predicate_end(preds_str).ok_or_else(|| SelectorError::Syntax(s.into()))?;
        let body = &preds_str[1..close];
        predicates.push(parse_predicate(body).ok_or_else(|| SelectorError::Syntax(s.into()))?);
        preds_str = &preds_str[close + 1..];
    }

    Ok(Step {
        descendant,
        test,
        predicates,
    })
}

fn predicate_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_predicate(body: &str) -> Option<Predicate> {
    let body = body.trim();
    if body.chars().all(|c| c.is_ascii_digit()) && !body.is_empty() {
        let n: usize = body.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some(Predicate::Position(n));
    }
    let rest = body.strip_prefix('@')?;
    let eq = rest.find('=')?;
    let (name, value) = rest.split_at(eq);
    let value = value[1..].trim();
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
    let (prefix, local) = split_qname(name.trim())?;
    Some(Predicate::AttrEquals {
        prefix,
        local,
        value: value.to_string(),
    })
}

fn split_qname(name: &str) -> Option<(Option<String>, String)> {
    if name.is_empty() || !name.chars().all(is_name_char) {
        return None;
    }
    match name.split_once(':') {
        Some((p, l)) if !p.is_empty() && !l.is_empty() && !l.contains(':') => {
            Some((Some(p.to_string()), l.to_string()))
        }
        Some(_) => None,
        None => Some((None, name.to_string())),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn element_matches(el: &Element, test: &NodeTest, ns: &NsScope) -> bool {
    match test {
        NodeTest::Wildcard => true,
        NodeTest::Element { prefix, local } => match prefix {
            Some(p) => match ns.get(p.as_str()) {
                Some(uri) => el.ns.as_deref() == Some(uri.as_str()) && el.local == *local,
                // unbound prefix: literal qualified-name match
                None => el.qname == format!("{}:{}", p, local),
            },
            None => el.ns.is_none() && el.local == *local,
        },
        NodeTest::Attribute { .. } => false,
    }
}

fn attr_matches(attr: &Attr, prefix: Option<&str>, local: &str, ns: &NsScope) -> bool {
    match prefix {
        Some(p) => match ns.get(p) {
            Some(uri) => attr.ns.as_deref() == Some(uri.as_str()) && attr.local == local,
            None => attr.qname == format!("{}:{}", p, local),
        },
        None => attr.ns.is_none() && attr.local == local,
    }
}

fn apply_predicate(
    tree: &XmlTree,
    matched: Vec<NodeId>,
    pred: &Predicate,
    ns: &NsScope,
) -> Vec<NodeId> {
    match pred {
        Predicate::Position(n) => matched.into_iter().nth(n - 1).into_iter().collect(),
        Predicate::AttrEquals {
            prefix,
            local,
            value,
        } => matched
            .into_iter()
            .filter(|&id| match tree.node(id) {
                XmlNode::Element(el) => el.attrs.iter().any(|a| {
                    attr_matches(a, prefix.as_deref(), local, ns) && a.value == *value
                }),
                _ => false,
            })
            .collect(),
    }
}

fn child_elements(tree: &XmlTree, ctx: NodeId) -> Vec<NodeId> {
    match tree.node(ctx) {
        XmlNode::Element(el) => el
            .children
            .iter()
            .copied()
            .filter(|&id| matches!(tree.node(id), XmlNode::Element(_)))
            .collect(),
        _ => Vec::new(),
    }
}

fn descendant_elements(tree: &XmlTree, ctx: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    collect_descendants(tree, ctx, &mut out);
    out
}

fn collect_descendants(tree: &XmlTree, ctx: NodeId, out: &mut Vec<NodeId>) {
    if let XmlNode::Element(el) = tree.node(ctx) {
        for &child in &el.children {
            if matches!(tree.node(child), XmlNode::Element(_)) {
                out.push(child);
                collect_descendants(tree, child, out);
            }
        }
    }
}
