use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tenant (index) identifier — a plain string like `"products"`.
pub type TenantId = String;
/// Document identifier — matches `objectID` in the Algolia convention.
pub type DocumentId = String;

/// A document with an identifier and a set of named, typed fields.
///
/// Use [`Document::from_json`] to parse from a JSON object. Re-adding a
/// document with the same id replaces the prior version atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    /// Parse a [`Document`] from a JSON object.
    ///
    /// The object must carry an `"objectID"` string; all other entries become
    /// typed [`FieldValue`]s (nulls are dropped).
    ///
    /// # Errors
    ///
    /// [`QuernError::InvalidDocument`] if the value is not a JSON object,
    /// [`QuernError::MissingField`] if `objectID` is absent.
    ///
    /// [`QuernError::InvalidDocument`]: crate::QuernError::InvalidDocument
    /// [`QuernError::MissingField`]: crate::QuernError::MissingField
    pub fn from_json(json: &serde_json::Value) -> crate::error::Result<Self> {
        use crate::error::QuernError;

        let obj = json
            .as_object()
            .ok_or_else(|| QuernError::InvalidDocument("expected a JSON object".to_string()))?;

        let id = obj
            .get("objectID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| QuernError::MissingField("objectID".to_string()))?
            .to_string();

        let mut fields = HashMap::new();
        for (key, val) in obj {
            if key == "objectID" {
                continue;
            }
            if let Some(field_value) = FieldValue::from_json(val) {
                fields.insert(key.clone(), field_value);
            }
        }

        Ok(Document { id, fields })
    }

    /// Convert back to the flat Algolia-style JSON shape:
    /// `{"objectID": "...", "field": value, ...}`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "objectID".to_string(),
            serde_json::Value::String(self.id.clone()),
        );
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Look up a field by dotted path (`"specs.weight"` descends into nested
    /// objects). Returns `None` for unknown paths.
    pub fn get_path(&self, path: &str) -> Option<&FieldValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            match current {
                FieldValue::Object(map) => current = map.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

/// A dynamically-typed field value stored in a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Object(HashMap<String, FieldValue>),
    Array(Vec<FieldValue>),
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn from_json(val: &serde_json::Value) -> Option<FieldValue> {
        match val {
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FieldValue::Integer(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            serde_json::Value::Array(arr) => {
                let items: Vec<FieldValue> = arr.iter().filter_map(FieldValue::from_json).collect();
                if items.is_empty() {
                    None
                } else {
                    Some(FieldValue::Array(items))
                }
            }
            serde_json::Value::Object(obj) => {
                let mut nested = HashMap::new();
                for (k, v) in obj {
                    if let Some(fv) = FieldValue::from_json(v) {
                        nested.insert(k.clone(), fv);
                    }
                }
                if nested.is_empty() {
                    None
                } else {
                    Some(FieldValue::Object(nested))
                }
            }
            serde_json::Value::Null => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::json!(i),
            FieldValue::Float(f) => serde_json::json!(f),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Object(obj) => {
                let mut map = serde_json::Map::new();
                for (k, v) in obj {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// One mutation inside a write batch.
#[derive(Debug, Clone)]
pub enum WriteAction {
    /// Add or replace a document (delete-then-add within one commit).
    Upsert(Document),
    /// Tombstone a document id.
    Delete(DocumentId),
    /// Delete every document in the tenant.
    Clear,
}

/// Terminal observability for one asynchronous write batch.
///
/// The state machine is `Pending -> Published | Error`; a task is only
/// marked terminal after its segment is committed and the reader reloaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Published,
    Error(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// A single rejected document inside an otherwise-successful batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocFailure {
    pub doc_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub status: TaskStatus,
    pub received_operations: usize,
    /// Documents added or replaced by the batch.
    pub indexed_documents: usize,
    /// Tombstones applied by the batch.
    pub deleted_documents: usize,
    pub rejected_count: usize,
    pub rejected_documents: Vec<DocFailure>,
    pub created_at: std::time::SystemTime,
}

impl TaskInfo {
    pub fn new(id: String, received_operations: usize) -> Self {
        TaskInfo {
            id,
            status: TaskStatus::Pending,
            received_operations,
            indexed_documents: 0,
            deleted_documents: 0,
            rejected_count: 0,
            rejected_documents: Vec::new(),
            created_at: std::time::SystemTime::now(),
        }
    }
}

/// A single facet value with its document count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

/// Facet counts keyed by attribute name.
pub type FacetCounts = HashMap<String, Vec<FacetCount>>;

/// A matching document with its position-independent relevance score.
#[derive(Debug, Clone)]
pub struct Hit {
    pub document: Document,
    /// Coarse textual score (matched words); ordering authority is the full
    /// ranking comparator, this is informational.
    pub score: f32,
}

/// Results of one search request.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    /// Total matching documents after filters and rule hides, before
    /// pagination.
    pub nb_hits: usize,
    pub nb_pages: usize,
    pub page: usize,
    pub processing_time_ms: u64,
    pub facets: FacetCounts,
}

/// Engine health snapshot for operational monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_writers: usize,
    pub max_concurrent_writers: usize,
    pub facet_cache_entries: usize,
    pub facet_cache_cap: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_from_json_requires_object_id() {
        let err = Document::from_json(&json!({"title": "no id"})).unwrap_err();
        assert!(matches!(err, crate::QuernError::MissingField(_)));
    }

    #[test]
    fn document_json_roundtrip() {
        let doc = Document::from_json(&json!({
            "objectID": "1",
            "title": "MacBook Pro",
            "price": 2399,
            "in_stock": true,
            "tags": ["laptop", "apple"],
            "specs": {"weight": 1.6}
        }))
        .unwrap();
        assert_eq!(doc.id, "1");
        assert_eq!(doc.fields["price"], FieldValue::Integer(2399));
        assert_eq!(doc.fields["in_stock"], FieldValue::Bool(true));

        let back = doc.to_json();
        assert_eq!(back["objectID"], "1");
        assert_eq!(back["specs"]["weight"], 1.6);
    }

    #[test]
    fn get_path_descends_nested_objects() {
        let doc = Document::from_json(&json!({
            "objectID": "1",
            "specs": {"dims": {"w": 30}}
        }))
        .unwrap();
        assert_eq!(doc.get_path("specs.dims.w").unwrap().as_number(), Some(30.0));
        assert!(doc.get_path("specs.missing").is_none());
        assert!(doc.get_path("specs.dims.w.deeper").is_none());
    }
}
