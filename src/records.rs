//! JSON-lines record files as a [`RecordStore`].
//!
//! Each non-blank line is one JSON object. The file is streamed on every
//! pass, never held in memory whole.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use vector_index_core::source::{MapRecord, Record, RecordStore};
use vector_index_core::{IndexError, MetadataValue, Result};

pub struct JsonLinesRecordStore {
    model: String,
    path: PathBuf,
    pk_field: String,
    schema: Option<Vec<String>>,
}

impl JsonLinesRecordStore {
    pub fn new(model: impl Into<String>, path: impl Into<PathBuf>, pk_field: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            path: path.into(),
            pk_field: pk_field.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, fields: Vec<String>) -> Self {
        self.schema = Some(fields);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct LineCursor {
    model: String,
    pk_field: String,
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
}

impl LineCursor {
    async fn next_record(mut self) -> Result<Option<(Arc<MapRecord>, Self)>> {
        if self.lines.is_none() {
            let file = File::open(&self.path).await.map_err(|e| {
                IndexError::backend(format!("open {}", self.path.display()), e)
            })?;
            self.lines = Some(BufReader::new(file).lines());
        }
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };
            let line = lines.next_line().await.map_err(|e| {
                IndexError::backend(format!("read {}", self.path.display()), e)
            })?;
            let Some(line) = line else {
                return Ok(None);
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = self.parse(&line)?;
            return Ok(Some((Arc::new(record), self)));
        }
    }

    fn parse(&self, line: &str) -> Result<MapRecord> {
        let location = format!("{}:{}", self.path.display(), self.line_no);
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| IndexError::backend(format!("parse {location}"), e))?;
        MapRecord::from_json(&self.model, &self.pk_field, &value)
            .map_err(|e| IndexError::config(format!("{location}: {e}")))
    }
}

#[async_trait]
impl RecordStore for JsonLinesRecordStore {
    type Record = MapRecord;

    fn model_label(&self) -> &str {
        &self.model
    }

    fn records(&self) -> BoxStream<'_, Result<Arc<MapRecord>>> {
        let cursor = LineCursor {
            model: self.model.clone(),
            pk_field: self.pk_field.clone(),
            path: self.path.clone(),
            lines: None,
            line_no: 0,
        };
        stream::try_unfold(cursor, LineCursor::next_record).boxed()
    }

    async fn fetch_many(&self, pks: &[MetadataValue]) -> Result<Vec<Arc<MapRecord>>> {
        let wanted: BTreeSet<String> = pks.iter().map(|pk| pk.to_string()).collect();
        self.records()
            .try_filter(|r| futures::future::ready(wanted.contains(&r.pk().to_string())))
            .try_collect()
            .await
    }

    fn schema(&self) -> Option<Vec<String>> {
        self.schema.clone()
    }
}

/// Render a record's fields as a JSON object, in field order.
pub fn record_to_json(record: &dyn Record) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for name in record.field_names() {
        if let Some(value) = record.field(&name) {
            object.insert(name, value.to_json());
        }
    }
    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn books_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 1, "title": "Dune", "genre": "scifi"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": 2, "title": "Odes", "genre": "poetry", "tags": ["a", "b"]}}"#).unwrap();
        file
    }

    #[tokio::test]
    async fn test_streams_records_skipping_blank_lines() {
        let file = books_file();
        let store = JsonLinesRecordStore::new("library.Book", file.path(), "id");
        let records: Vec<Arc<MapRecord>> = store.records().try_collect().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pk(), MetadataValue::Int(1));
        assert_eq!(records[1].field("tags"), Some(MetadataValue::from(r#"["a","b"]"#)));
        assert_eq!(records[1].model_label(), "library.Book");
    }

    #[tokio::test]
    async fn test_fetch_many_matches_pk_text() {
        let file = books_file();
        let store = JsonLinesRecordStore::new("library.Book", file.path(), "id");
        let found = store
            .fetch_many(&[MetadataValue::from("2"), MetadataValue::Int(7)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field("title"), Some(MetadataValue::from("Odes")));
    }

    #[tokio::test]
    async fn test_bad_line_reports_location() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"title": "no id"}}"#).unwrap();
        let store = JsonLinesRecordStore::new("library.Book", file.path(), "id");
        let err = store.records().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(err, IndexError::Config(ref m) if m.contains(":1:")));
    }

    #[tokio::test]
    async fn test_missing_file_is_backend_error() {
        let store = JsonLinesRecordStore::new("library.Book", "/nonexistent/books.jsonl", "id");
        let err = store.records().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(err, IndexError::Backend { .. }));
    }

    #[test]
    fn test_record_to_json() {
        let record = MapRecord::new("library.Book", 1)
            .with_field("id", 1)
            .with_field("title", "Dune");
        assert_eq!(
            record_to_json(&record),
            serde_json::json!({"id": 1, "title": "Dune"})
        );
    }
}
