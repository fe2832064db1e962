//! Filtered, sorted, paged token listing
//!
//! Compiles filter and sort criteria into one SQL plan over the store: a
//! `filter` CTE scoped to one document and one user (through the role table)
//! assigns every matching token a stable `sort` rank, and the page, id-list
//! and statistics queries all run against that same CTE. Every property
//! referenced by a filter or a sort key contributes exactly one value
//! sub-join resolving the cell's current value (latest edit, else original),
//! in ordinal order, so identical criteria always compile to the identical
//! plan.
//!
//! Filters match the current value case-insensitively with SQL `LIKE`
//! semantics; the caller supplies wildcards. Filter and sort names that match
//! no property are skipped; statistics on an unknown property are an error.

mod errors;

pub use errors::{CollectionError, CollectionResult};

use std::rc::Rc;

use rusqlite::types::Value as SqlValue;
use serde_json::{json, Map, Value};

use crate::store::StoreSession;

const CURRENT_EDIT_SUBQUERY: &str = "SELECT document_id, property_xpath, token_id, value FROM (
    SELECT document_id, property_xpath, token_id, value,
           ROW_NUMBER() OVER (
               PARTITION BY document_id, property_xpath, token_id
               ORDER BY date DESC, id DESC
           ) AS n
    FROM \"values\"
) WHERE n = 1";

#[derive(Debug, Clone)]
struct PropRef {
    name: String,
    xpath: String,
    ord: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatEntry {
    pub value: String,
    pub count: i64,
}

/// One page of token records plus the total size of the filtered set
#[derive(Debug, Clone)]
pub struct TokenPage {
    pub total: i64,
    pub rows: Vec<Map<String, Value>>,
}

/// A query surface over one document's tokens, as seen by one user
pub struct TokenCollection {
    store: Rc<StoreSession>,
    document_id: i64,
    user_id: String,
    props: Vec<PropRef>,
    token_id_filter: Option<i64>,
    /// (property name, LIKE pattern), at most one per property
    filters: Vec<(String, String)>,
    /// Property names, `-` prefix for descending
    sorting: Vec<String>,
}

impl TokenCollection {
    pub fn new(
        store: Rc<StoreSession>,
        document_id: i64,
        user_id: &str,
    ) -> CollectionResult<TokenCollection> {
        let props = {
            let mut stmt = store.conn().prepare_cached(
                "SELECT name, property_xpath, ord FROM properties
                 WHERE document_id = ?1 ORDER BY ord",
            )?;
            let props = stmt
                .query_map([document_id], |row| {
                    Ok(PropRef {
                        name: row.get(0)?,
                        xpath: row.get(1)?,
                        ord: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            props
        };
        Ok(TokenCollection {
            store,
            document_id,
            user_id: user_id.to_string(),
            props,
            token_id_filter: None,
            filters: Vec::new(),
            sorting: Vec::new(),
        })
    }

    pub fn set_token_id_filter(&mut self, token_id: Option<i64>) {
        self.token_id_filter = token_id;
    }

    /// Adds a current-value filter; a second filter on the same property
    /// replaces the first.
    pub fn add_filter(&mut self, property: &str, pattern: &str) {
        if let Some(existing) = self.filters.iter_mut().find(|(name, _)| name == property) {
            existing.1 = pattern.to_string();
        } else {
            self.filters.push((property.to_string(), pattern.to_string()));
        }
    }

    /// Sets the sort key sequence; entries prefixed with `-` sort descending.
    /// Token id is always the final tie-breaker.
    pub fn set_sorting(&mut self, sorting: Vec<String>) {
        self.sorting = sorting;
    }

    fn property(&self, name: &str) -> Option<&PropRef> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Properties referenced by any filter or sort key, in ordinal order.
    fn referenced_properties(&self) -> Vec<&PropRef> {
        let mut referenced: Vec<&PropRef> = Vec::new();
        let names = self
            .sorting
            .iter()
            .map(|s| s.strip_prefix('-').unwrap_or(s))
            .chain(self.filters.iter().map(|(name, _)| name.as_str()));
        for name in names {
            if let Some(prop) = self.property(name) {
                if !referenced.iter().any(|p| p.ord == prop.ord) {
                    referenced.push(prop);
                }
            }
        }
        referenced.sort_by_key(|p| p.ord);
        referenced
    }

    /// Compiles the `filter` CTE body and its positional parameters.
    fn filter_sql(&self) -> (String, Vec<SqlValue>) {
        let mut params: Vec<SqlValue> = vec![
            SqlValue::Integer(self.document_id),
            SqlValue::Text(self.user_id.clone()),
        ];
        let mut joins = String::new();

        if let Some(token_id) = self.token_id_filter {
            joins.push_str("\n    JOIN (SELECT ? AS token_id) tid USING (token_id)");
            params.push(SqlValue::Integer(token_id));
        }

        for prop in self.referenced_properties() {
            let pattern = self
                .filters
                .iter()
                .find(|(name, _)| *name == prop.name)
                .map(|(_, pattern)| pattern);
            let filter_clause = match pattern {
                Some(_) => " AND LOWER(COALESCE(e.value, o.value)) LIKE LOWER(?)",
                None => "",
            };
            joins.push_str(&format!(
                "\n    JOIN (SELECT o.document_id, o.token_id, COALESCE(e.value, o.value) AS v{ord}
        FROM orig_values o
        LEFT JOIN ({CURRENT_EDIT_SUBQUERY}) e
            ON e.document_id = o.document_id
            AND e.property_xpath = o.property_xpath
            AND e.token_id = o.token_id
        WHERE o.document_id = ? AND o.property_xpath = ?{filter_clause}
    ) f{ord} USING (document_id, token_id)",
                ord = prop.ord,
            ));
            params.push(SqlValue::Integer(self.document_id));
            params.push(SqlValue::Text(prop.xpath.clone()));
            if let Some(pattern) = pattern {
                params.push(SqlValue::Text(pattern.clone()));
            }
        }

        let mut order = Vec::new();
        for key in &self.sorting {
            let (name, desc) = match key.strip_prefix('-') {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            if let Some(prop) = self.property(name) {
                order.push(format!("v{}{}", prop.ord, if desc { " DESC" } else { "" }));
            }
        }
        order.push("token_id".to_string());

        let sql = format!(
            "SELECT document_id, token_id, ROW_NUMBER() OVER (ORDER BY {order}) AS sort
    FROM (SELECT du.document_id FROM documents_users du
          WHERE du.document_id = ? AND du.user_id = ?) du
    JOIN tokens USING (document_id){joins}",
            order = order.join(", "),
        );
        (sql, params)
    }

    fn filtered_total(&self, filter: &str, params: &[SqlValue]) -> CollectionResult<i64> {
        let sql = format!("WITH filter AS ({filter}) SELECT COUNT(*) FROM filter");
        let total = self.store.conn().query_row(
            &sql,
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// One page of token records in sort order. `page_size` of `None` means
    /// the whole filtered set. Record values are the cells' current values.
    pub fn page(&self, page_size: Option<i64>, offset: i64) -> CollectionResult<TokenPage> {
        let (filter, params) = self.filter_sql();
        let total = self.filtered_total(&filter, &params)?;

        let sql = format!(
            "WITH filter AS ({filter})
             SELECT f.token_id, p.name, COALESCE(e.value, o.value) AS value
             FROM (SELECT * FROM filter ORDER BY sort LIMIT ? OFFSET ?) f
             JOIN properties p ON p.document_id = ?
             JOIN orig_values o
                 ON o.document_id = ? AND o.token_id = f.token_id
                 AND o.property_xpath = p.property_xpath
             LEFT JOIN ({CURRENT_EDIT_SUBQUERY}) e
                 ON e.document_id = o.document_id
                 AND e.property_xpath = o.property_xpath
                 AND e.token_id = o.token_id
             ORDER BY f.sort, p.ord"
        );
        let mut all_params = params;
        all_params.push(SqlValue::Integer(page_size.unwrap_or(-1)));
        all_params.push(SqlValue::Integer(offset));
        all_params.push(SqlValue::Integer(self.document_id));
        all_params.push(SqlValue::Integer(self.document_id));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(all_params.iter()))?;

        let mut records: Vec<Map<String, Value>> = Vec::new();
        let mut current: Option<i64> = None;
        while let Some(row) = rows.next()? {
            let token_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let value: String = row.get(2)?;
            if current != Some(token_id) {
                let mut record = Map::new();
                record.insert("tokenId".to_string(), json!(token_id));
                records.push(record);
                current = Some(token_id);
            }
            if let Some(record) = records.last_mut() {
                record.insert(name, Value::String(value));
            }
        }
        Ok(TokenPage {
            total,
            rows: records,
        })
    }

    /// Token ids only, same filter and order as [`page`](Self::page).
    pub fn token_ids(&self, page_size: Option<i64>, offset: i64) -> CollectionResult<(i64, Vec<i64>)> {
        let (filter, params) = self.filter_sql();
        let total = self.filtered_total(&filter, &params)?;

        let sql =
            format!("WITH filter AS ({filter}) SELECT token_id FROM filter ORDER BY sort LIMIT ? OFFSET ?");
        let mut all_params = params;
        all_params.push(SqlValue::Integer(page_size.unwrap_or(-1)));
        all_params.push(SqlValue::Integer(offset));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let ids = stmt
            .query_map(rusqlite::params_from_iter(all_params.iter()), |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((total, ids))
    }

    /// Current-value frequency counts for one property over the filtered set,
    /// most frequent first. Unknown property names are an error here, unlike
    /// in filters.
    pub fn stats(&self, property: &str) -> CollectionResult<Vec<StatEntry>> {
        let prop = self
            .property(property)
            .ok_or_else(|| CollectionError::UnknownProperty(property.to_string()))?
            .clone();
        let (filter, mut params) = self.filter_sql();

        let sql = format!(
            "WITH filter AS ({filter})
             SELECT COALESCE(e.value, o.value) AS value, COUNT(*) AS count
             FROM filter f
             JOIN orig_values o
                 ON o.document_id = ? AND o.token_id = f.token_id AND o.property_xpath = ?
             LEFT JOIN ({CURRENT_EDIT_SUBQUERY}) e
                 ON e.document_id = o.document_id
                 AND e.property_xpath = o.property_xpath
                 AND e.token_id = o.token_id
             GROUP BY COALESCE(e.value, o.value)
             ORDER BY count DESC, value"
        );
        params.push(SqlValue::Integer(self.document_id));
        params.push(SqlValue::Text(prop.xpath));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let entries = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(StatEntry {
                    value: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
