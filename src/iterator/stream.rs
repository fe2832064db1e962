//! Streaming strategy
//!
//! Walks the quick-xml event stream in constant memory. Only a token
//! selector of the form `//name` is supported: token starts are recognized
//! by resolved element name, everything else is re-emitted verbatim to a
//! scratch file (export mode), and only the current token's subtree is ever
//! materialized as a tree. Writing the current token is deferred until the
//! cursor advances so that a replacement can still be substituted.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tempfile::NamedTempFile;

use crate::schema::Schema;
use crate::token::Token;
use crate::xml::{event_raw, merge_scope, resolve_qname, NsScope, TreeBuilder, XmlError, XmlResult};

use super::errors::{IterResult, IteratorError};
use super::{TokenIterator, XML_PROLOG};

enum NameMatcher {
    /// Prefix resolved through the schema's bindings at construction
    Bound { ns: Option<String>, local: String },
    /// Unbound prefix, matched against the literal qualified name
    Literal(String),
}

struct Pending {
    id: i64,
    raw: String,
    replacement: Option<String>,
}

/// Constant-memory iterator over `//name` tokens
pub struct StreamIterator {
    path: PathBuf,
    schema: Rc<Schema>,
    matcher: NameMatcher,
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
    scopes: Vec<Rc<NsScope>>,
    out: Option<NamedTempFile>,
    export_mode: bool,
    pos: i64,
    pending: Option<Pending>,
    done: bool,
}

impl StreamIterator {
    pub fn new(path: &Path, schema: Rc<Schema>, export: bool) -> IterResult<StreamIterator> {
        let selector = schema.token_selector();
        let Some((prefix, local)) = selector.as_streamable_name() else {
            return Err(IteratorError::UnsupportedSelector(
                selector.as_str().to_string(),
            ));
        };
        let matcher = match prefix {
            None => NameMatcher::Bound {
                ns: None,
                local: local.to_string(),
            },
            Some(p) => match schema.namespaces().get(p) {
                Some(uri) => NameMatcher::Bound {
                    ns: Some(uri.clone()),
                    local: local.to_string(),
                },
                None => NameMatcher::Literal(format!("{}:{}", p, local)),
            },
        };

        let mut it = StreamIterator {
            path: path.to_path_buf(),
            schema,
            matcher,
            reader: open_reader(path)?,
            buf: Vec::new(),
            scopes: vec![Rc::new(NsScope::new())],
            out: None,
            export_mode: export,
            pos: 0,
            pending: None,
            done: false,
        };
        if export {
            it.out = Some(new_scratch()?);
        }
        Ok(it)
    }

    fn matches(&self, e: &BytesStart, scope: &NsScope) -> XmlResult<bool> {
        let name = e.name();
        let qname = std::str::from_utf8(name.as_ref())?;
        Ok(match &self.matcher {
            NameMatcher::Literal(expected) => qname == expected,
            NameMatcher::Bound { ns, local } => {
                let (l, n) = resolve_qname(qname, scope);
                &l == local && n.as_deref() == ns.as_deref()
            }
        })
    }

    fn write_raw(&mut self, text: &str) -> IterResult<()> {
        if let Some(out) = &mut self.out {
            out.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// Writes the deferred current token: its replacement if one was
    /// substituted, its untouched raw text otherwise.
    fn flush_pending(&mut self) -> IterResult<()> {
        if let Some(pending) = self.pending.take() {
            let text = pending.replacement.unwrap_or(pending.raw);
            self.write_raw(&text)?;
        }
        Ok(())
    }

    /// Reads events into `builder` until the token subtree closes.
    fn read_subtree(&mut self, mut builder: TreeBuilder) -> IterResult<Option<Token>> {
        let mut buf = Vec::new();
        while !builder.is_complete() {
            buf.clear();
            let ev = self
                .reader
                .read_event_into(&mut buf)
                .map_err(XmlError::from)?;
            if matches!(ev, Event::Eof) {
                return Err(
                    XmlError::Parse("unexpected end of document inside a token".into()).into(),
                );
            }
            builder.push(&ev)?;
        }
        self.finish_token(builder)
    }

    fn finish_token(&mut self, builder: TreeBuilder) -> IterResult<Option<Token>> {
        let tree = builder.finish()?;
        // untouched, so this is the verbatim source text of the subtree
        let raw = tree.serialize();
        self.pos += 1;
        let token = Token::new(self.pos, tree, self.schema.clone())?;
        self.pending = Some(Pending {
            id: self.pos,
            raw,
            replacement: None,
        });
        Ok(Some(token))
    }
}

impl TokenIterator for StreamIterator {
    fn rewind(&mut self) -> IterResult<()> {
        self.reader = open_reader(&self.path)?;
        self.scopes = vec![Rc::new(NsScope::new())];
        self.pos = 0;
        self.pending = None;
        self.done = false;
        if self.export_mode {
            self.out = Some(new_scratch()?);
        }
        Ok(())
    }

    fn advance(&mut self) -> IterResult<Option<Token>> {
        self.flush_pending()?;
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let ev = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(XmlError::from)?
                .into_owned();
            match &ev {
                Event::Eof => {
                    self.done = true;
                    return Ok(None);
                }
                Event::Start(e) => {
                    let attrs = start_attrs(e)?;
                    let scope = merge_scope(&current_scope(&self.scopes), &attrs);
                    if self.matches(e, &scope)? {
                        let mut builder = TreeBuilder::with_scope(current_scope(&self.scopes));
                        builder.push(&ev)?;
                        return self.read_subtree(builder);
                    }
                    self.write_raw(&event_raw(&ev)?)?;
                    self.scopes.push(scope);
                }
                Event::Empty(e) => {
                    let attrs = start_attrs(e)?;
                    let scope = merge_scope(&current_scope(&self.scopes), &attrs);
                    if self.matches(e, &scope)? {
                        let mut builder = TreeBuilder::with_scope(current_scope(&self.scopes));
                        builder.push(&ev)?;
                        return self.finish_token(builder);
                    }
                    self.write_raw(&event_raw(&ev)?)?;
                }
                Event::End(_) => {
                    self.write_raw(&event_raw(&ev)?)?;
                    self.scopes.pop();
                }
                // dropped: export writes a normalized prolog of its own
                Event::Decl(_) => {}
                _ => self.write_raw(&event_raw(&ev)?)?,
            }
        }
    }

    fn replace_token(&mut self, token: &Token) -> IterResult<()> {
        let Some(pending) = &mut self.pending else {
            return Err(IteratorError::NoCurrentToken);
        };
        if token.id() != pending.id {
            return Err(IteratorError::TokenMismatch {
                expected: pending.id,
                got: token.id(),
            });
        }
        pending.replacement = Some(token.markup());
        Ok(())
    }

    fn export(&mut self, path: Option<&Path>) -> IterResult<Option<String>> {
        if !self.export_mode {
            return Err(IteratorError::NotExportable);
        }
        // drain whatever the caller did not visit
        while self.advance()?.is_some() {}
        let out = self.out.take().ok_or(IteratorError::NotExportable)?;
        match path {
            Some(dest) => {
                std::fs::copy(out.path(), dest)?;
                Ok(None)
            }
            None => Ok(Some(std::fs::read_to_string(out.path())?)),
        }
    }
}

fn open_reader(path: &Path) -> IterResult<Reader<BufReader<File>>> {
    Ok(Reader::from_file(path).map_err(XmlError::from)?)
}

fn new_scratch() -> IterResult<NamedTempFile> {
    let mut scratch = NamedTempFile::new()?;
    scratch.write_all(XML_PROLOG.as_bytes())?;
    Ok(scratch)
}

fn current_scope(scopes: &[Rc<NsScope>]) -> Rc<NsScope> {
    scopes.last().cloned().unwrap_or_default()
}

fn start_attrs(e: &BytesStart) -> XmlResult<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        attrs.push((
            std::str::from_utf8(attr.key.as_ref())?.to_string(),
            attr.unescape_value()?.into_owned(),
        ));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SCHEMA: &str = r#"<schema>
        <tokenXPath>//w</tokenXPath>
        <properties>
            <property>
                <propertyName>lemma</propertyName>
                <propertyXPath>@lemma</propertyXPath>
                <propertyType>free text</propertyType>
            </property>
        </properties>
    </schema>"#;

    fn schema() -> Rc<Schema> {
        Rc::new(Schema::from_xml(SCHEMA).unwrap())
    }

    fn doc_file(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_unsupported_selector() {
        let schema = Rc::new(
            Schema::from_xml(&SCHEMA.replace("//w", "/TEI/text/w")).unwrap(),
        );
        let f = doc_file("<r/>");
        let err = StreamIterator::new(f.path(), schema, false).err().unwrap();
        assert!(matches!(err, IteratorError::UnsupportedSelector(_)));
    }

    #[test]
    fn test_token_ids_are_positional() {
        let f = doc_file("<r><w lemma=\"a\">x</w><other/><w lemma=\"b\">y</w></r>");
        let mut it = StreamIterator::new(f.path(), schema(), false).unwrap();
        assert_eq!(it.advance().unwrap().unwrap().id(), 1);
        assert_eq!(it.advance().unwrap().unwrap().id(), 2);
        assert!(it.advance().unwrap().is_none());
        // terminal: stays exhausted
        assert!(it.advance().unwrap().is_none());
    }

    #[test]
    fn test_rewind_restarts() {
        let f = doc_file("<r><w lemma=\"a\">x</w></r>");
        let mut it = StreamIterator::new(f.path(), schema(), false).unwrap();
        assert!(it.advance().unwrap().is_some());
        assert!(it.advance().unwrap().is_none());
        it.rewind().unwrap();
        assert_eq!(it.advance().unwrap().unwrap().id(), 1);
    }

    #[test]
    fn test_export_is_verbatim_without_edits() {
        let body = "<r a='1'><!--c--><w lemma=\"a\">x</w>tail<w lemma=\"b\"><e/></w></r>";
        let content = format!("<?xml version=\"1.0\"?>\n{body}");
        let f = doc_file(&content);
        let mut it = StreamIterator::new(f.path(), schema(), true).unwrap();
        let out = it.export(None).unwrap().unwrap();
        assert_eq!(out, format!("{XML_PROLOG}\n{body}"));
    }

    #[test]
    fn test_replacement_substitutes_current_token_only() {
        let f = doc_file("<r><w lemma=\"a\">x</w><w lemma=\"b\">y</w></r>");
        let mut it = StreamIterator::new(f.path(), schema(), true).unwrap();
        let t1 = it.advance().unwrap().unwrap();
        let replacement =
            Token::new(t1.id(), crate::xml::parse_str("<w lemma=\"Z\">x</w>").unwrap(), schema())
                .unwrap();
        it.replace_token(&replacement).unwrap();
        let out = it.export(None).unwrap().unwrap();
        assert_eq!(
            out,
            format!("{XML_PROLOG}<r><w lemma=\"Z\">x</w><w lemma=\"b\">y</w></r>")
        );
    }

    #[test]
    fn test_replace_wrong_id_fails() {
        let f = doc_file("<r><w lemma=\"a\">x</w></r>");
        let mut it = StreamIterator::new(f.path(), schema(), true).unwrap();
        let t = it.advance().unwrap().unwrap();
        let wrong =
            Token::new(t.id() + 1, crate::xml::parse_str("<w lemma=\"z\"/>").unwrap(), schema())
                .unwrap();
        assert!(matches!(
            it.replace_token(&wrong),
            Err(IteratorError::TokenMismatch { .. })
        ));
    }

    #[test]
    fn test_namespaced_token_matching() {
        let schema = Rc::new(
            Schema::from_xml(
                r#"<schema>
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
                </schema>"#,
            )
            .unwrap(),
        );
        let f = doc_file("<r xmlns=\"http://tei\"><w lemma=\"a\">x</w></r>");
        let mut it = StreamIterator::new(f.path(), schema, false).unwrap();
        let t = it.advance().unwrap().unwrap();
        assert_eq!(t.value(0).unwrap().as_deref(), Some("a"));
        assert!(it.advance().unwrap().is_none());
    }

    #[test]
    fn test_export_without_export_mode_fails() {
        let f = doc_file("<r/>");
        let mut it = StreamIterator::new(f.path(), schema(), false).unwrap();
        assert!(matches!(it.export(None), Err(IteratorError::NotExportable)));
    }
}
