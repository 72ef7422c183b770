use crate::error::{QuernError, Result};
use crate::schema::Schema;
use crate::types::{Document, FieldValue};
use tantivy::schema::{Field, Value};
use tantivy::TantivyDocument;

/// Converts between [`Document`] and the tantivy representation.
///
/// Each tantivy document carries three fields: the raw `_id`, the indexed
/// `_all` text stream (searchable attribute values in schema priority
/// order), and the stored `_source` JSON used as the forward store.
pub struct DocumentConverter {
    id_field: Field,
    all_field: Field,
    source_field: Field,
}

impl DocumentConverter {
    pub fn new(schema: &tantivy::schema::Schema) -> Result<Self> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| QuernError::MissingField(name.to_string()))
        };
        Ok(DocumentConverter {
            id_field: field("_id")?,
            all_field: field("_all")?,
            source_field: field("_source")?,
        })
    }

    pub fn id_field(&self) -> Field {
        self.id_field
    }

    pub fn all_field(&self) -> Field {
        self.all_field
    }

    /// Build the tantivy document for `doc` under the tenant schema in
    /// effect at commit time.
    pub fn to_tantivy(&self, doc: &Document, schema: &Schema) -> Result<TantivyDocument> {
        let mut tdoc = TantivyDocument::new();
        tdoc.add_text(self.id_field, &doc.id);
        for chunk in searchable_text(doc, schema) {
            tdoc.add_text(self.all_field, chunk);
        }
        tdoc.add_text(self.source_field, serde_json::to_string(&doc.to_json())?);
        Ok(tdoc)
    }

    /// Reconstruct a [`Document`] from the stored `_source` JSON.
    pub fn from_tantivy(&self, tdoc: &TantivyDocument) -> Result<Document> {
        let source = tdoc
            .get_first(self.source_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| QuernError::MissingField("_source".to_string()))?;
        let json: serde_json::Value = serde_json::from_str(source)?;
        Document::from_json(&json)
    }
}

/// The text chunks a document contributes to the `_all` field.
///
/// With declared searchable attributes the chunks come out in priority
/// order; with an empty declaration every text value is indexed, sorted by
/// field name for determinism.
pub fn searchable_text(doc: &Document, schema: &Schema) -> Vec<String> {
    let mut chunks = Vec::new();
    if schema.searchable_attributes.is_empty() {
        let mut names: Vec<&String> = doc.fields.keys().collect();
        names.sort();
        for name in names {
            collect_text(&doc.fields[name], &mut chunks);
        }
    } else {
        for attr in &schema.searchable_attributes {
            if let Some(value) = doc.get_path(attr) {
                collect_text(value, &mut chunks);
            }
        }
    }
    chunks
}

fn collect_text(value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::Text(s) => out.push(s.clone()),
        FieldValue::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        FieldValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                collect_text(&map[key], out);
            }
        }
        FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::Bool(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_json(&json!({
            "objectID": "1",
            "title": "MacBook Pro",
            "brand": "Apple",
            "price": 2399,
            "tags": ["laptop", "m3"]
        }))
        .unwrap()
    }

    #[test]
    fn searchable_text_honors_attribute_order() {
        let schema = Schema {
            searchable_attributes: vec!["brand".to_string(), "title".to_string()],
            ..Default::default()
        };
        assert_eq!(searchable_text(&doc(), &schema), vec!["Apple", "MacBook Pro"]);
    }

    #[test]
    fn empty_schema_indexes_all_text_fields() {
        let chunks = searchable_text(&doc(), &Schema::default());
        assert_eq!(chunks, vec!["Apple", "laptop", "m3", "MacBook Pro"]);
    }

    #[test]
    fn undeclared_attributes_are_skipped() {
        let schema = Schema {
            searchable_attributes: vec!["title".to_string()],
            ..Default::default()
        };
        let chunks = searchable_text(&doc(), &schema);
        assert_eq!(chunks, vec!["MacBook Pro"]);
    }
}
