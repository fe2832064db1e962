//! Relational annotation store
//!
//! One SQLite database holds every imported document: its schema projection,
//! token existence records, write-once original values and the append-only
//! edit history. "Current value" of a cell is the latest edit if any exist,
//! else the original value; corrections append, nothing is ever updated or
//! deleted.
//!
//! Edit timestamps are RFC 3339 UTC with microsecond precision, so their
//! lexicographic order is their chronological order and `ORDER BY date` needs
//! no parsing. Edits sharing a timestamp are tie-broken by insertion id.

mod errors;
mod functions;

pub use errors::{StoreError, StoreResult};

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::schema::{ProjectedProperty, Schema};

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    document_id INTEGER PRIMARY KEY,
    token_xpath TEXT NOT NULL,
    name        TEXT NOT NULL,
    save_path   TEXT NOT NULL,
    hash        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS documents_namespaces (
    document_id INTEGER NOT NULL REFERENCES documents (document_id) ON DELETE CASCADE,
    prefix      TEXT NOT NULL,
    ns          TEXT NOT NULL,
    PRIMARY KEY (document_id, prefix)
);
CREATE TABLE IF NOT EXISTS properties (
    document_id    INTEGER NOT NULL REFERENCES documents (document_id) ON DELETE CASCADE,
    property_xpath TEXT NOT NULL,
    type_id        TEXT NOT NULL,
    name           TEXT NOT NULL,
    ord            INTEGER NOT NULL,
    read_only      INTEGER NOT NULL DEFAULT 0,
    optional       INTEGER NOT NULL DEFAULT 0,
    attributes     TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (document_id, property_xpath),
    UNIQUE (document_id, name)
);
CREATE TABLE IF NOT EXISTS tokens (
    document_id INTEGER NOT NULL REFERENCES documents (document_id) ON DELETE CASCADE,
    token_id    INTEGER NOT NULL,
    PRIMARY KEY (document_id, token_id)
);
CREATE TABLE IF NOT EXISTS orig_values (
    document_id    INTEGER NOT NULL,
    token_id       INTEGER NOT NULL,
    property_xpath TEXT NOT NULL,
    value          TEXT NOT NULL,
    PRIMARY KEY (document_id, token_id, property_xpath),
    FOREIGN KEY (document_id, token_id)
        REFERENCES tokens (document_id, token_id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name    TEXT
);
CREATE TABLE IF NOT EXISTS documents_users (
    document_id INTEGER NOT NULL REFERENCES documents (document_id) ON DELETE CASCADE,
    user_id     TEXT NOT NULL REFERENCES users (user_id),
    role        TEXT NOT NULL,
    PRIMARY KEY (document_id, user_id)
);
CREATE TABLE IF NOT EXISTS "values" (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id    INTEGER NOT NULL,
    token_id       INTEGER NOT NULL,
    property_xpath TEXT NOT NULL,
    user_id        TEXT NOT NULL REFERENCES users (user_id),
    value          TEXT NOT NULL,
    date           TEXT NOT NULL,
    FOREIGN KEY (document_id, token_id)
        REFERENCES tokens (document_id, token_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS values_cell_idx
    ON "values" (document_id, property_xpath, token_id, date DESC, id DESC);
CREATE TABLE IF NOT EXISTS import_tmp (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    xml      TEXT NOT NULL,
    selector TEXT NOT NULL,
    ns_json  TEXT NOT NULL
);
"#;

/// One append-only edit record of a cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRecord {
    pub user_id: String,
    pub date: String,
    pub value: String,
}

/// The documents-table row for one imported document
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub document_id: i64,
    pub token_xpath: String,
    pub name: String,
    pub save_path: String,
    pub hash: String,
}

/// An open connection to the annotation store
pub struct StoreSession {
    conn: Connection,
}

impl StoreSession {
    pub fn open(path: &Path) -> StoreResult<StoreSession> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<StoreSession> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<StoreSession> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_DDL)?;
        functions::register(&conn)?;
        Ok(StoreSession { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn begin(&self) -> StoreResult<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    pub fn commit(&self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> StoreResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// RFC 3339 UTC timestamp at microsecond precision.
    pub fn now() -> String {
        format_date(Utc::now())
    }

    // ------------------------------------------------------------------
    // documents and schema projection
    // ------------------------------------------------------------------

    pub fn next_document_id(&self) -> StoreResult<i64> {
        let id = self.conn.query_row(
            "SELECT COALESCE(MAX(document_id), 0) + 1 FROM documents",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn insert_document(
        &self,
        document_id: i64,
        token_xpath: &str,
        name: &str,
        save_path: &str,
        hash: &str,
    ) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO documents (document_id, token_xpath, name, save_path, hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![document_id, token_xpath, name, save_path, hash])?;
        Ok(())
    }

    pub fn document_row(&self, document_id: i64) -> StoreResult<DocumentRow> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT document_id, token_xpath, name, save_path, hash
             FROM documents WHERE document_id = ?1",
        )?;
        stmt.query_row([document_id], |row| {
            Ok(DocumentRow {
                document_id: row.get(0)?,
                token_xpath: row.get(1)?,
                name: row.get(2)?,
                save_path: row.get(3)?,
                hash: row.get(4)?,
            })
        })
        .optional()?
        .ok_or(StoreError::DocumentNotFound(document_id))
    }

    /// Removes a document and, through cascading foreign keys, its schema
    /// projection, tokens, original values and edit history.
    pub fn delete_document(&self, document_id: i64) -> StoreResult<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM documents WHERE document_id = ?1", [document_id])?;
        if deleted == 0 {
            return Err(StoreError::DocumentNotFound(document_id));
        }
        Ok(())
    }

    pub fn save_schema(&self, document_id: i64, schema: &Schema) -> StoreResult<()> {
        {
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO documents_namespaces (document_id, prefix, ns) VALUES (?1, ?2, ?3)",
            )?;
            for (prefix, uri) in schema.namespaces() {
                stmt.execute(params![document_id, prefix, uri])?;
            }
        }
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO properties
                 (document_id, property_xpath, type_id, name, ord, read_only, optional, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for prop in schema.properties() {
            stmt.execute(params![
                document_id,
                prop.selector.as_str(),
                prop.property_type.tag(),
                prop.name,
                prop.ord,
                prop.read_only,
                prop.optional,
                serde_json::to_string(&prop.attributes)?,
            ])?;
        }
        Ok(())
    }

    /// Rows needed to rebuild the schema of an imported document.
    pub fn schema_projection(
        &self,
        document_id: i64,
    ) -> StoreResult<(String, Vec<(String, String)>, Vec<ProjectedProperty>)> {
        let token_xpath = self.document_row(document_id)?.token_xpath;

        let mut stmt = self.conn.prepare_cached(
            "SELECT prefix, ns FROM documents_namespaces WHERE document_id = ?1 ORDER BY prefix",
        )?;
        let namespaces = stmt
            .query_map([document_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare_cached(
            "SELECT name, property_xpath, type_id, ord, read_only, optional, attributes
             FROM properties WHERE document_id = ?1 ORDER BY ord",
        )?;
        let properties = stmt
            .query_map([document_id], |row| {
                Ok(ProjectedProperty {
                    name: row.get(0)?,
                    selector: row.get(1)?,
                    type_tag: row.get(2)?,
                    ord: row.get(3)?,
                    read_only: row.get(4)?,
                    optional: row.get(5)?,
                    attributes_json: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((token_xpath, namespaces, properties))
    }

    // ------------------------------------------------------------------
    // tokens and values
    // ------------------------------------------------------------------

    pub fn insert_token(&self, document_id: i64, token_id: i64) -> StoreResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO tokens (document_id, token_id) VALUES (?1, ?2)")?;
        stmt.execute(params![document_id, token_id])?;
        Ok(())
    }

    pub fn token_count(&self, document_id: i64) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE document_id = ?1",
            [document_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Write-once original value, set at import.
    pub fn insert_orig_value(
        &self,
        document_id: i64,
        token_id: i64,
        property_xpath: &str,
        value: &str,
    ) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO orig_values (document_id, token_id, property_xpath, value)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![document_id, token_id, property_xpath, value])?;
        Ok(())
    }

    pub fn orig_value(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
    ) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT value FROM orig_values
             WHERE document_id = ?1 AND property_xpath = ?2 AND token_id = ?3",
        )?;
        let value = stmt
            .query_row(params![document_id, property_xpath, token_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Appends an edit record, timestamped now.
    pub fn record_edit(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
        user_id: &str,
        value: &str,
    ) -> StoreResult<()> {
        self.record_edit_at(
            document_id,
            property_xpath,
            token_id,
            user_id,
            value,
            &Self::now(),
        )
    }

    pub fn record_edit_at(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
        user_id: &str,
        value: &str,
        date: &str,
    ) -> StoreResult<()> {
        self.upsert_user(user_id, None)?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO \"values\" (document_id, token_id, property_xpath, user_id, value, date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            document_id,
            token_id,
            property_xpath,
            user_id,
            value,
            date
        ])?;
        Ok(())
    }

    /// Latest edit value of a cell, `None` when it was never edited.
    pub fn current_edit(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
    ) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT value FROM \"values\"
             WHERE document_id = ?1 AND property_xpath = ?2 AND token_id = ?3
             ORDER BY date DESC, id DESC LIMIT 1",
        )?;
        let value = stmt
            .query_row(params![document_id, property_xpath, token_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Latest edit if any, else the original value.
    pub fn current_value(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
    ) -> StoreResult<Option<String>> {
        match self.current_edit(document_id, property_xpath, token_id)? {
            Some(value) => Ok(Some(value)),
            None => self.orig_value(document_id, property_xpath, token_id),
        }
    }

    /// Full edit history of a cell, newest first.
    pub fn edits(
        &self,
        document_id: i64,
        property_xpath: &str,
        token_id: i64,
    ) -> StoreResult<Vec<EditRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT user_id, date, value FROM \"values\"
             WHERE document_id = ?1 AND property_xpath = ?2 AND token_id = ?3
             ORDER BY date DESC, id DESC",
        )?;
        let records = stmt
            .query_map(params![document_id, property_xpath, token_id], |row| {
                Ok(EditRecord {
                    user_id: row.get(0)?,
                    date: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ------------------------------------------------------------------
    // users
    // ------------------------------------------------------------------

    pub fn upsert_user(&self, user_id: &str, name: Option<&str>) -> StoreResult<()> {
        let sql = match name {
            Some(_) => {
                "INSERT INTO users (user_id, name) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET name = excluded.name"
            }
            None => {
                "INSERT INTO users (user_id, name) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO NOTHING"
            }
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        stmt.execute(params![user_id, name])?;
        Ok(())
    }

    pub fn set_document_role(
        &self,
        document_id: i64,
        user_id: &str,
        role: &str,
    ) -> StoreResult<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO documents_users (document_id, user_id, role) VALUES (?1, ?2, ?3)
             ON CONFLICT (document_id, user_id) DO UPDATE SET role = excluded.role",
        )?;
        stmt.execute(params![document_id, user_id, role])?;
        Ok(())
    }

    /// Users associated with a document, with their roles, ordered by id.
    pub fn document_users(
        &self,
        document_id: i64,
    ) -> StoreResult<Vec<(String, String, Option<String>)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT du.user_id, du.role, u.name
             FROM documents_users du JOIN users u ON u.user_id = du.user_id
             WHERE du.document_id = ?1
             ORDER BY du.user_id",
        )?;
        let users = stmt
            .query_map([document_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ------------------------------------------------------------------
    // import staging (relational iterator strategy)
    // ------------------------------------------------------------------

    /// Stages a document's text for in-database token decomposition.
    pub fn stage_document(
        &self,
        xml: &str,
        selector: &str,
        namespaces_json: &str,
    ) -> StoreResult<i64> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO import_tmp (xml, selector, ns_json) VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![xml, selector, namespaces_json])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Token markup strings of a staged document, in document order.
    pub fn staged_tokens(&self, staging_id: i64) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT je.value
             FROM import_tmp t, json_each(xml_tokens(t.xml, t.selector, t.ns_json)) je
             WHERE t.id = ?1",
        )?;
        let tokens = stmt
            .query_map([staging_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tokens)
    }

    pub fn clear_staged(&self, staging_id: i64) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM import_tmp WHERE id = ?1", [staging_id])?;
        Ok(())
    }
}

pub(crate) fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_document() -> StoreSession {
        let store = StoreSession::open_in_memory().unwrap();
        store
            .insert_document(1, "//w", "doc", "/tmp/1.xml", "hash")
            .unwrap();
        store.insert_token(1, 1).unwrap();
        store.insert_orig_value(1, 1, "@lemma", "aaa").unwrap();
        store
    }

    #[test]
    fn test_current_value_falls_back_to_original() {
        let store = session_with_document();
        assert_eq!(
            store.current_value(1, "@lemma", 1).unwrap().as_deref(),
            Some("aaa")
        );
        assert_eq!(store.current_value(1, "@missing", 1).unwrap(), None);
    }

    #[test]
    fn test_latest_edit_wins() {
        let store = session_with_document();
        store
            .record_edit_at(1, "@lemma", 1, "u1", "bbb", "2024-01-01T00:00:00.000000Z")
            .unwrap();
        store
            .record_edit_at(1, "@lemma", 1, "u2", "ccc", "2024-01-02T00:00:00.000000Z")
            .unwrap();
        assert_eq!(
            store.current_value(1, "@lemma", 1).unwrap().as_deref(),
            Some("ccc")
        );
        store
            .record_edit_at(1, "@lemma", 1, "u1", "ddd", "2024-01-03T00:00:00.000000Z")
            .unwrap();
        assert_eq!(
            store.current_value(1, "@lemma", 1).unwrap().as_deref(),
            Some("ddd")
        );
    }

    #[test]
    fn test_same_timestamp_breaks_ties_by_insertion() {
        let store = session_with_document();
        let date = "2024-01-01T00:00:00.000000Z";
        store.record_edit_at(1, "@lemma", 1, "u1", "x", date).unwrap();
        store.record_edit_at(1, "@lemma", 1, "u1", "y", date).unwrap();
        assert_eq!(
            store.current_value(1, "@lemma", 1).unwrap().as_deref(),
            Some("y")
        );
    }

    #[test]
    fn test_edits_newest_first() {
        let store = session_with_document();
        store
            .record_edit_at(1, "@lemma", 1, "u1", "b", "2024-01-01T00:00:00.000000Z")
            .unwrap();
        store
            .record_edit_at(1, "@lemma", 1, "u2", "c", "2024-01-02T00:00:00.000000Z")
            .unwrap();
        let history = store.edits(1, "@lemma", 1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, "c");
        assert_eq!(history[1].value, "b");
    }

    #[test]
    fn test_delete_document_cascades() {
        let store = session_with_document();
        store.record_edit(1, "@lemma", 1, "u1", "bbb").unwrap();
        store.delete_document(1).unwrap();
        assert!(matches!(
            store.document_row(1),
            Err(StoreError::DocumentNotFound(1))
        ));
        let tokens: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM tokens", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tokens, 0);
        let values: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM \"values\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(values, 0);
    }

    #[test]
    fn test_delete_missing_document_fails() {
        let store = StoreSession::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_document(7),
            Err(StoreError::DocumentNotFound(7))
        ));
    }

    #[test]
    fn test_staging_round_trip() {
        let store = StoreSession::open_in_memory().unwrap();
        let id = store
            .stage_document("<r><w>a</w><w>b</w></r>", "//w", "{}")
            .unwrap();
        assert_eq!(
            store.staged_tokens(id).unwrap(),
            vec!["<w>a</w>", "<w>b</w>"]
        );
        store.clear_staged(id).unwrap();
        assert!(store.staged_tokens(id).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_format_sorts_chronologically() {
        let a = format_date("2024-01-01T00:00:00.000001Z".parse().unwrap());
        let b = format_date("2024-01-01T00:00:00.000002Z".parse().unwrap());
        assert!(a < b);
        assert!(a.ends_with('Z'));
    }
}
