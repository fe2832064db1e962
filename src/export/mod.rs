//! Tabular export sinks
//!
//! External formatters consume only the flattened per-token records (see
//! [`Token::flat_record`](crate::token::Token::flat_record)); the sink
//! contract is `begin(schema)`, one `write_row` per token in document order,
//! then `end()`.

use std::io::Write;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::Schema;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A consumer of flattened token records
pub trait TableSink {
    fn begin(&mut self, schema: &Schema) -> SinkResult<()>;
    fn write_row(&mut self, row: &Map<String, Value>) -> SinkResult<()>;
    fn end(&mut self) -> SinkResult<()>;
}

/// CSV sink: header row from the schema, one record per token
pub struct CsvSink<W: Write> {
    out: W,
    delimiter: char,
    columns: Vec<String>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W) -> CsvSink<W> {
        Self::with_delimiter(out, ',')
    }

    pub fn with_delimiter(out: W, delimiter: char) -> CsvSink<W> {
        CsvSink {
            out,
            delimiter,
            columns: Vec::new(),
        }
    }

    fn write_record(&mut self, fields: &[String]) -> SinkResult<()> {
        let mut line = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                line.push(self.delimiter);
            }
            line.push_str(&csv_field(field, self.delimiter));
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl<W: Write> TableSink for CsvSink<W> {
    fn begin(&mut self, schema: &Schema) -> SinkResult<()> {
        self.columns = std::iter::once("tokenId".to_string())
            .chain(schema.properties().iter().map(|p| p.name.clone()))
            .collect();
        let header = self.columns.clone();
        self.write_record(&header)
    }

    fn write_row(&mut self, row: &Map<String, Value>) -> SinkResult<()> {
        let fields: Vec<String> = self
            .columns
            .iter()
            .map(|col| match row.get(col) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        self.write_record(&fields)
    }

    fn end(&mut self) -> SinkResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn csv_field(value: &str, delimiter: char) -> String {
    let needs_quoting =
        value.contains(delimiter) || value.contains('"') || value.contains('\n') || value.contains('\r');
    if !needs_quoting {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// JSON sink: one array of record objects
pub struct JsonSink<W: Write> {
    out: W,
    rows: usize,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> JsonSink<W> {
        JsonSink { out, rows: 0 }
    }
}

impl<W: Write> TableSink for JsonSink<W> {
    fn begin(&mut self, _schema: &Schema) -> SinkResult<()> {
        self.out.write_all(b"[")?;
        Ok(())
    }

    fn write_row(&mut self, row: &Map<String, Value>) -> SinkResult<()> {
        if self.rows > 0 {
            self.out.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.out, row)?;
        self.rows += 1;
        Ok(())
    }

    fn end(&mut self) -> SinkResult<()> {
        self.out.write_all(b"]")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"<schema>
        <tokenXPath>//w</tokenXPath>
        <properties>
            <property>
                <propertyName>lemma</propertyName>
                <propertyXPath>@lemma</propertyXPath>
                <propertyType>free text</propertyType>
            </property>
            <property>
                <propertyName>type</propertyName>
                <propertyXPath>./type</propertyXPath>
                <propertyType>free text</propertyType>
            </property>
        </properties>
    </schema>"#;

    fn row(id: i64, lemma: &str, ty: Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("tokenId".into(), json!(id));
        m.insert("lemma".into(), json!(lemma));
        m.insert("type".into(), ty);
        m
    }

    #[test]
    fn test_csv_output() {
        let schema = Schema::from_xml(SCHEMA).unwrap();
        let mut buf = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buf);
            sink.begin(&schema).unwrap();
            sink.write_row(&row(1, "a,b", json!("x"))).unwrap();
            sink.write_row(&row(2, "plain", Value::Null)).unwrap();
            sink.end().unwrap();
        }
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out, "tokenId,lemma,type\n1,\"a,b\",x\n2,plain,\n");
    }

    #[test]
    fn test_csv_escapes_quotes_and_newlines() {
        assert_eq!(csv_field("say \"hi\"", ','), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("a\nb", ','), "\"a\nb\"");
        assert_eq!(csv_field("plain", ','), "plain");
    }

    #[test]
    fn test_json_output() {
        let schema = Schema::from_xml(SCHEMA).unwrap();
        let mut buf = Vec::new();
        {
            let mut sink = JsonSink::new(&mut buf);
            sink.begin(&schema).unwrap();
            sink.write_row(&row(1, "a", json!("x"))).unwrap();
            sink.write_row(&row(2, "b", json!("y"))).unwrap();
            sink.end().unwrap();
        }
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(
            out,
            "[{\"tokenId\":1,\"lemma\":\"a\",\"type\":\"x\"},\
             {\"tokenId\":2,\"lemma\":\"b\",\"type\":\"y\"}]"
        );
    }

    #[test]
    fn test_json_empty_is_valid_array() {
        let schema = Schema::from_xml(SCHEMA).unwrap();
        let mut buf = Vec::new();
        {
            let mut sink = JsonSink::new(&mut buf);
            sink.begin(&schema).unwrap();
            sink.end().unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "[]");
    }
}
