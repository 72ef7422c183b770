use crate::schema::Schema;
use crate::types::{Document, FacetCount, FacetCounts};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// At most this many distinct values are returned per facet attribute.
const MAX_VALUES_PER_FACET: usize = 100;

/// Count facet values over the filtered candidate set.
///
/// Only attributes declared for faceting and not `filterOnly(...)` are
/// counted. Values are the string forms of text, bool, and numeric fields;
/// array elements count individually. Output is sorted by count descending,
/// then value ascending, truncated per attribute.
pub fn count_facets(docs: &[&Document], requested: &[String], schema: &Schema) -> FacetCounts {
    let mut counts = FacetCounts::new();
    for attr in requested {
        if !schema.is_countable_facet(attr) {
            continue;
        }
        let mut values: IndexMap<String, u64> = IndexMap::new();
        for doc in docs {
            if let Some(value) = doc.get_path(attr) {
                for s in facet_strings(value) {
                    *values.entry(s).or_insert(0) += 1;
                }
            }
        }
        let mut list: Vec<FacetCount> = values
            .into_iter()
            .map(|(value, count)| FacetCount { value, count })
            .collect();
        list.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        list.truncate(MAX_VALUES_PER_FACET);
        counts.insert(attr.clone(), list);
    }
    counts
}

fn facet_strings(value: &crate::types::FieldValue) -> Vec<String> {
    use crate::types::FieldValue::*;
    match value {
        Text(s) => vec![s.clone()],
        Bool(b) => vec![b.to_string()],
        Integer(i) => vec![i.to_string()],
        Float(f) => vec![format_float(*f)],
        Array(items) => items.iter().flat_map(facet_strings).collect(),
        Object(_) => Vec::new(),
    }
}

/// Integral floats print without the trailing `.0` so `3.0` and `3` share a
/// facet value.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Process-wide LRU cache for computed facet counts.
///
/// Keys embed the tenant, so a tenant's entries can be dropped wholesale
/// when one of its segments is published. A hit refreshes recency; at
/// capacity the least recently used entry is evicted.
pub struct FacetCache {
    entries: Mutex<IndexMap<String, Arc<FacetCounts>>>,
    cap: usize,
}

impl FacetCache {
    pub fn new(cap: usize) -> Self {
        FacetCache {
            entries: Mutex::new(IndexMap::new()),
            cap,
        }
    }

    /// Cache key for one (tenant, query, filter, facet list) combination.
    pub fn key(tenant: &str, query: &str, filter_fingerprint: &str, facets: &[String]) -> String {
        format!(
            "{tenant}\u{1}{}\u{1}{filter_fingerprint}\u{1}{}",
            query.to_lowercase(),
            facets.join(",")
        )
    }

    pub fn get(&self, key: &str) -> Option<Arc<FacetCounts>> {
        let mut entries = self.entries.lock().ok()?;
        // Reinsert on hit so the entry becomes most recently used.
        let hit = entries.shift_remove(key)?;
        entries.insert(key.to_string(), Arc::clone(&hit));
        Some(hit)
    }

    pub fn insert(&self, key: String, counts: Arc<FacetCounts>) {
        if self.cap == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.shift_remove(&key);
        while entries.len() >= self.cap {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
        }
        entries.insert(key, counts);
    }

    /// Drop every cached entry for a tenant.
    pub fn invalidate_tenant(&self, tenant: &str) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let prefix = format!("{tenant}\u{1}");
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        debug!(tenant, dropped = before - entries.len(), "facet cache invalidated");
    }

    pub fn entries(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
