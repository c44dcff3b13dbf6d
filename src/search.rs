//! `vidx search` and `vidx similar`: run a query and print JSON results.

use anyhow::Result;
use serde_json::{json, Value};

use vector_index_core::query::ResolvedObject;
use vector_index_core::source::MapRecord;
use vector_index_core::{Document, MetadataValue};

use crate::config::Config;
use crate::factory;
use crate::records::record_to_json;

/// Options shared by the search commands.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub documents: bool,
    pub limit: Option<usize>,
    pub offset: usize,
    pub filters: Vec<(String, String)>,
}

/// Read a `--filter` value: `null`, `true`/`false`, integers and floats
/// are typed; anything else is text.
pub fn parse_filter_value(raw: &str) -> MetadataValue {
    match raw {
        "null" => MetadataValue::Null,
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                MetadataValue::Int(i)
            } else if let Ok(x) = raw.parse::<f64>() {
                MetadataValue::Float(x)
            } else {
                MetadataValue::Text(raw.to_string())
            }
        }
    }
}

fn document_json(doc: &Document) -> Value {
    json!({
        "document_key": doc.document_key,
        "content": doc.content,
        "metadata": doc.metadata,
    })
}

/// JSON for a resolved result: the record's fields for objects, the raw
/// document for bare-source hits.
pub fn resolved_json(item: &ResolvedObject) -> Value {
    match item {
        ResolvedObject::Object(object) => {
            let fields = item
                .downcast_ref::<MapRecord>()
                .map(|record| record_to_json(record))
                .unwrap_or(Value::Null);
            json!({ "object_key": object.object_key(), "fields": fields })
        }
        ResolvedObject::Document(doc) => json!({ "document": document_json(doc) }),
    }
}

pub async fn run_search(
    config: &Config,
    index_name: &str,
    query: &str,
    options: SearchOptions,
) -> Result<()> {
    let app = factory::open(config.clone()).await?;
    let index = app.index(index_name)?;
    let limit = options.limit.unwrap_or(config.retrieval.default_limit);

    let output: Vec<Value> = if options.documents {
        let mut results = index.search_documents(query).await?;
        for (field, raw) in &options.filters {
            results = results.filter(field, parse_filter_value(raw))?;
        }
        results
            .offset(options.offset)
            .limit(limit)
            .fetch()
            .await?
            .iter()
            .map(document_json)
            .collect()
    } else {
        let mut results = index.search_sources(query).await?;
        for (field, raw) in &options.filters {
            results = results.filter(field, parse_filter_value(raw))?;
        }
        results
            .offset(options.offset)
            .limit(limit)
            .fetch()
            .await?
            .iter()
            .map(resolved_json)
            .collect()
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub async fn run_similar(
    config: &Config,
    index_name: &str,
    source_id: &str,
    pk: &str,
    limit: Option<usize>,
) -> Result<()> {
    let app = factory::open(config.clone()).await?;
    let index = app.index(index_name)?;
    let object = app.load_object(index_name, source_id, pk).await?;

    let results = index
        .find_similar(&object)
        .await?
        .limit(limit.unwrap_or(config.retrieval.default_limit))
        .fetch()
        .await?;

    let output: Vec<Value> = results.iter().map(resolved_json).collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vector_index_core::source::IndexObject;

    #[test]
    fn test_parse_filter_value() {
        assert_eq!(parse_filter_value("null"), MetadataValue::Null);
        assert_eq!(parse_filter_value("true"), MetadataValue::Bool(true));
        assert_eq!(parse_filter_value("1965"), MetadataValue::Int(1965));
        assert_eq!(parse_filter_value("4.5"), MetadataValue::Float(4.5));
        assert_eq!(parse_filter_value("scifi"), MetadataValue::from("scifi"));
    }

    #[test]
    fn test_resolved_json() {
        let record: Arc<dyn IndexObject> =
            Arc::new(MapRecord::new("library.Book", 1).with_field("title", "Dune"));
        let value = resolved_json(&ResolvedObject::Object(record));
        assert_eq!(value["object_key"], "library.Book:1");
        assert_eq!(value["fields"]["title"], "Dune");

        let doc = Document::new("notes:1:0", "hello");
        let value = resolved_json(&ResolvedObject::Document(doc));
        assert_eq!(value["document"]["content"], "hello");
    }
}
