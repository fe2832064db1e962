//! Document lifecycle
//!
//! A [`Document`] ties one stored raw XML file to its schema projection and
//! annotation rows. Import decomposes the file into tokens and persists them
//! together with a byte-exact copy of the source; export runs the decomposition
//! again over that copy and writes annotations back in, either replacing the
//! original values or appending audit fragments.
//!
//! The store session is shared, not owned: callers that want an atomic import
//! wrap it in `begin`/`commit` themselves.

mod errors;

pub use errors::{DocumentError, DocumentResult};

use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::export::TableSink;
use crate::iterator::{self, Strategy};
use crate::schema::Schema;
use crate::store::StoreSession;

/// Import tuning knobs. The defaults import every token and abort on the
/// first one with an unresolvable required property.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Stop after this many saved tokens.
    pub limit: Option<usize>,
    /// Log and count tokens with unresolvable properties instead of failing.
    pub skip_broken: bool,
    /// Pin an iterator strategy; `None` negotiates automatically.
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub document_id: i64,
    pub processed: usize,
    pub skipped: usize,
}

/// How annotations are written back into the exported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Substitute each property's current value for the original.
    Replace,
    /// Keep originals and append one audit fragment per edit record.
    Enrich,
}

/// One imported document: stored file, schema, annotation rows
pub struct Document {
    store: Rc<StoreSession>,
    schema: Rc<Schema>,
    document_id: i64,
    name: String,
    save_path: PathBuf,
    strategy: Option<Strategy>,
}

impl Document {
    /// Imports `file` under the schema descriptor at `schema_file`:
    /// decomposes it into tokens, persists the schema projection and original
    /// values, stores a byte-exact copy under `save_dir`, and grants `user_id`
    /// the owner role. Transactionality belongs to the caller.
    pub fn import(
        store: Rc<StoreSession>,
        file: &Path,
        schema_file: &Path,
        name: &str,
        user_id: &str,
        save_dir: &Path,
        opts: &ImportOptions,
    ) -> DocumentResult<(Document, ImportReport)> {
        if !file.is_file() {
            return Err(DocumentError::FileNotFound(file.to_path_buf()));
        }
        let schema = Rc::new(Schema::from_file(schema_file)?);

        let document_id = store.next_document_id()?;
        let hash = sha256_file(file)?;
        let save_path = save_dir.join(format!("{document_id}.xml"));
        store.insert_document(
            document_id,
            schema.token_selector().as_str(),
            name,
            &save_path.to_string_lossy(),
            &hash,
        )?;
        store.save_schema(document_id, &schema)?;
        store.upsert_user(user_id, None)?;
        store.set_document_role(document_id, user_id, "owner")?;

        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut it = iterator::open(file, schema.clone(), store.clone(), opts.strategy, false)?;
        while let Some(token) = it.advance()? {
            if opts.limit.is_some_and(|limit| processed >= limit) {
                break;
            }
            if opts.skip_broken && !token.invalid_properties().is_empty() {
                tracing::warn!(
                    token_id = token.id(),
                    properties = ?token.invalid_properties(),
                    "skipping token with unresolvable properties"
                );
                skipped += 1;
                continue;
            }
            token.save(&store, document_id)?;
            processed += 1;
        }
        drop(it);

        std::fs::copy(file, &save_path)?;
        tracing::info!(document_id, processed, skipped, document = name, "document imported");

        let report = ImportReport {
            document_id,
            processed,
            skipped,
        };
        let document = Document {
            store,
            schema,
            document_id,
            name: name.to_string(),
            save_path,
            strategy: opts.strategy,
        };
        Ok((document, report))
    }

    /// Loads an imported document, rebuilding its schema from the store's
    /// projection and verifying the stored file against its recorded hash.
    pub fn load(store: Rc<StoreSession>, document_id: i64) -> DocumentResult<Document> {
        let row = store.document_row(document_id)?;
        let (token_xpath, namespaces, properties) = store.schema_projection(document_id)?;
        let schema = Rc::new(Schema::from_projection(
            &token_xpath,
            namespaces,
            properties,
        )?);

        let save_path = PathBuf::from(&row.save_path);
        if !save_path.is_file() {
            return Err(DocumentError::FileNotFound(save_path));
        }
        if sha256_file(&save_path)? != row.hash {
            return Err(DocumentError::ContentIntegrityMismatch { path: save_path });
        }

        Ok(Document {
            store,
            schema,
            document_id,
            name: row.name,
            save_path,
            strategy: None,
        })
    }

    pub fn id(&self) -> i64 {
        self.document_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// Pins the iterator strategy used by subsequent exports.
    pub fn set_strategy(&mut self, strategy: Option<Strategy>) {
        self.strategy = strategy;
    }

    /// Reconstructs the document with annotations written back in: to `dest`
    /// when given, returned as a string otherwise. Tokens with no edits pass
    /// through byte-for-byte.
    pub fn export(&self, mode: ExportMode, dest: Option<&Path>) -> DocumentResult<Option<String>> {
        let mut it = iterator::open(
            &self.save_path,
            self.schema.clone(),
            self.store.clone(),
            self.strategy,
            true,
        )?;
        while let Some(mut token) = it.advance()? {
            let changed = match mode {
                ExportMode::Replace => token.update(&self.store, self.document_id)?,
                ExportMode::Enrich => token.enrich(&self.store, self.document_id)?,
            };
            if changed {
                it.replace_token(&token)?;
            }
        }
        Ok(it.export(dest)?)
    }

    /// Streams the flattened token records into `sink`, in document order.
    /// Audit mode carries original values and full edit histories.
    pub fn export_table(&self, sink: &mut dyn TableSink, audit: bool) -> DocumentResult<()> {
        sink.begin(&self.schema)?;
        let mut it = iterator::open(
            &self.save_path,
            self.schema.clone(),
            self.store.clone(),
            self.strategy,
            false,
        )?;
        while let Some(token) = it.advance()? {
            sink.write_row(&token.flat_record(&self.store, self.document_id, audit)?)?;
        }
        sink.end()?;
        Ok(())
    }

    /// Deletes a document's annotation rows and its stored file copy. An
    /// already-missing file is not an error.
    pub fn delete(store: &StoreSession, document_id: i64) -> DocumentResult<()> {
        let row = store.document_row(document_id)?;
        store.delete_document(document_id)?;
        match std::fs::remove_file(&row.save_path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }?;
        Ok(())
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::JsonSink;

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

    const XML: &str = "<doc>\n  <w lemma=\"aaa\">Hello</w>\n  <w lemma=\"bbb\">World</w>\n</doc>";

    struct Fixture {
        dir: tempfile::TempDir,
        store: Rc<StoreSession>,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                dir: tempfile::tempdir().unwrap(),
                store: Rc::new(StoreSession::open_in_memory().unwrap()),
            }
        }

        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn import(&self, xml: &str, opts: &ImportOptions) -> DocumentResult<(Document, ImportReport)> {
            let file = self.write("in.xml", xml);
            let schema = self.write("schema.xml", SCHEMA);
            Document::import(
                self.store.clone(),
                &file,
                &schema,
                "testdoc",
                "alice",
                self.dir.path(),
                opts,
            )
        }
    }

    #[test]
    fn test_import_persists_tokens_and_copy() {
        let fx = Fixture::new();
        let (doc, report) = fx.import(XML, &ImportOptions::default()).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(fx.store.token_count(doc.id()).unwrap(), 2);
        assert_eq!(
            fx.store.orig_value(doc.id(), "@lemma", 2).unwrap().as_deref(),
            Some("bbb")
        );
        assert_eq!(std::fs::read_to_string(doc.save_path()).unwrap(), XML);
        let users = fx.store.document_users(doc.id()).unwrap();
        assert_eq!(users, vec![("alice".into(), "owner".into(), None)]);
    }

    #[test]
    fn test_import_fails_on_broken_token() {
        let fx = Fixture::new();
        let err = fx
            .import("<doc><w>no lemma</w></doc>", &ImportOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DocumentError::Token(_)));
    }

    #[test]
    fn test_import_skip_broken_counts_skipped() {
        let fx = Fixture::new();
        let opts = ImportOptions {
            skip_broken: true,
            ..ImportOptions::default()
        };
        let (doc, report) = fx
            .import("<doc><w lemma=\"a\">x</w><w>broken</w><w lemma=\"b\">y</w></doc>", &opts)
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(fx.store.token_count(doc.id()).unwrap(), 2);
    }

    #[test]
    fn test_import_limit() {
        let fx = Fixture::new();
        let opts = ImportOptions {
            limit: Some(1),
            ..ImportOptions::default()
        };
        let (doc, report) = fx.import(XML, &opts).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(fx.store.token_count(doc.id()).unwrap(), 1);
    }

    #[test]
    fn test_load_rebuilds_schema_and_verifies_hash() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        let id = doc.id();
        drop(doc);

        let doc = Document::load(fx.store.clone(), id).unwrap();
        assert_eq!(doc.name(), "testdoc");
        assert_eq!(doc.schema().token_selector().as_str(), "//w");
        assert_eq!(doc.schema().properties().len(), 1);
    }

    #[test]
    fn test_load_detects_tampered_file() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        std::fs::write(doc.save_path(), "<doc/>").unwrap();
        let err = Document::load(fx.store.clone(), doc.id()).err().unwrap();
        assert!(matches!(err, DocumentError::ContentIntegrityMismatch { .. }));
    }

    #[test]
    fn test_export_replace_touches_only_edited_tokens() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        fx.store
            .record_edit(doc.id(), "@lemma", 2, "alice", "ccc")
            .unwrap();
        let out = doc.export(ExportMode::Replace, None).unwrap().unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n\
             <doc>\n  <w lemma=\"aaa\">Hello</w>\n  <w lemma=\"ccc\">World</w>\n</doc>"
        );
    }

    #[test]
    fn test_export_enrich_keeps_original_value() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        fx.store
            .record_edit_at(doc.id(), "@lemma", 1, "alice", "zzz", "2024-01-01T00:00:00.000000Z")
            .unwrap();
        let out = doc.export(ExportMode::Enrich, None).unwrap().unwrap();
        assert!(out.contains("lemma=\"aaa\""));
        assert!(out.contains("<fs type=\"tokeneditor\">"));
        assert!(out.contains("<f name=\"value\"><string>zzz</string></f>"));
    }

    #[test]
    fn test_export_to_file() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        let dest = fx.dir.path().join("out.xml");
        assert!(doc.export(ExportMode::Replace, Some(&dest)).unwrap().is_none());
        let out = std::fs::read_to_string(&dest).unwrap();
        assert!(out.ends_with(XML));
    }

    #[test]
    fn test_export_table_json() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        fx.store
            .record_edit(doc.id(), "@lemma", 1, "alice", "AAA")
            .unwrap();
        let mut buf = Vec::new();
        doc.export_table(&mut JsonSink::new(&mut buf), false).unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(rows[0]["lemma"], "AAA");
        assert_eq!(rows[1]["lemma"], "bbb");
    }

    #[test]
    fn test_delete_removes_rows_and_file() {
        let fx = Fixture::new();
        let (doc, _) = fx.import(XML, &ImportOptions::default()).unwrap();
        let path = doc.save_path().to_path_buf();
        let id = doc.id();
        drop(doc);

        Document::delete(&fx.store, id).unwrap();
        assert!(!path.exists());
        assert!(fx.store.document_row(id).is_err());
        // deleting again reports the missing document
        assert!(matches!(
            Document::delete(&fx.store, id),
            Err(DocumentError::Store(_))
        ));
    }
}
