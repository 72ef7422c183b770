use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One synonym record, in the Algolia wire shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Synonym {
    /// Multi-way: every listed term matches every other.
    #[serde(rename = "synonym")]
    Regular {
        #[serde(rename = "objectID")]
        object_id: String,
        synonyms: Vec<String>,
    },
    /// `input` matches the listed terms, not the reverse.
    #[serde(rename = "oneWaySynonym")]
    OneWay {
        #[serde(rename = "objectID")]
        object_id: String,
        input: String,
        synonyms: Vec<String>,
    },
    /// Corrections applied as a fallback tier with typo cost 1.
    #[serde(rename = "altCorrection1")]
    AltCorrection1 {
        #[serde(rename = "objectID")]
        object_id: String,
        word: String,
        corrections: Vec<String>,
    },
    /// Corrections applied as a fallback tier with typo cost 2.
    #[serde(rename = "altCorrection2")]
    AltCorrection2 {
        #[serde(rename = "objectID")]
        object_id: String,
        word: String,
        corrections: Vec<String>,
    },
    /// A placeholder token in documents stands for any of the replacements
    /// in queries.
    #[serde(rename = "placeholder")]
    Placeholder {
        #[serde(rename = "objectID")]
        object_id: String,
        placeholder: String,
        replacements: Vec<String>,
    },
}

impl Synonym {
    pub fn object_id(&self) -> &str {
        match self {
            Synonym::Regular { object_id, .. }
            | Synonym::OneWay { object_id, .. }
            | Synonym::AltCorrection1 { object_id, .. }
            | Synonym::AltCorrection2 { object_id, .. }
            | Synonym::Placeholder { object_id, .. } => object_id,
        }
    }

    fn terms(&self) -> Vec<&str> {
        match self {
            Synonym::Regular { synonyms, .. } => synonyms.iter().map(String::as_str).collect(),
            Synonym::OneWay { input, synonyms, .. } => {
                let mut t: Vec<&str> = vec![input];
                t.extend(synonyms.iter().map(String::as_str));
                t
            }
            Synonym::AltCorrection1 { word, corrections, .. }
            | Synonym::AltCorrection2 { word, corrections, .. } => {
                let mut t: Vec<&str> = vec![word];
                t.extend(corrections.iter().map(String::as_str));
                t
            }
            Synonym::Placeholder {
                placeholder,
                replacements,
                ..
            } => {
                let mut t: Vec<&str> = vec![placeholder];
                t.extend(replacements.iter().map(String::as_str));
                t
            }
        }
    }
}

/// Query-time expansion of one token.
///
/// `primary` terms (always including the token itself) feed the main
/// retrieval pass; `fallback` terms come from alt-corrections and are only
/// consulted when the primary pass underfills the requested page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub primary: Vec<String>,
    pub fallback: Vec<String>,
}

/// A tenant's synonym records, ordered by save time and persisted as
/// `synonyms.json`.
#[derive(Debug, Default)]
pub struct SynonymSet {
    records: IndexMap<String, Synonym>,
}

impl SynonymSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(SynonymSet::default());
        }
        let content = std::fs::read_to_string(path)?;
        let list: Vec<Synonym> = serde_json::from_str(&content)?;
        let mut records = IndexMap::new();
        for syn in list {
            records.insert(syn.object_id().to_string(), syn);
        }
        Ok(SynonymSet { records })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let list: Vec<&Synonym> = self.records.values().collect();
        std::fs::write(path, serde_json::to_string_pretty(&list)?)?;
        Ok(())
    }

    /// Insert or replace by objectID. Replacement keeps the original save
    /// position.
    pub fn upsert(&mut self, synonym: Synonym) {
        self.records
            .insert(synonym.object_id().to_string(), synonym);
    }

    pub fn get(&self, object_id: &str) -> Option<&Synonym> {
        self.records.get(object_id)
    }

    pub fn delete(&mut self, object_id: &str) -> bool {
        self.records.shift_remove(object_id).is_some()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Paged listing, optionally filtered by a substring match over any term
    /// in the record.
    pub fn search(&self, query: &str, page: usize, hits_per_page: usize) -> (Vec<Synonym>, usize) {
        let needle = query.to_lowercase();
        let matched: Vec<&Synonym> = self
            .records
            .values()
            .filter(|syn| {
                needle.is_empty()
                    || syn
                        .terms()
                        .iter()
                        .any(|t| t.to_lowercase().contains(&needle))
            })
            .collect();
        let total = matched.len();
        let hits = matched
            .into_iter()
            .skip(page * hits_per_page)
            .take(hits_per_page)
            .cloned()
            .collect();
        (hits, total)
    }

    /// Expand a lowercased query token into its equivalent terms.
    pub fn expand(&self, token: &str) -> Expansion {
        let mut exp = Expansion {
            primary: vec![token.to_string()],
            fallback: Vec::new(),
        };
        for syn in self.records.values() {
            match syn {
                Synonym::Regular { synonyms, .. } => {
                    if synonyms.iter().any(|s| s.eq_ignore_ascii_case(token)) {
                        for s in synonyms {
                            push_unique(&mut exp.primary, s);
                        }
                    }
                }
                Synonym::OneWay { input, synonyms, .. } => {
                    if input.eq_ignore_ascii_case(token) {
                        for s in synonyms {
                            push_unique(&mut exp.primary, s);
                        }
                    }
                }
                Synonym::AltCorrection1 { word, corrections, .. }
                | Synonym::AltCorrection2 { word, corrections, .. } => {
                    if word.eq_ignore_ascii_case(token) {
                        for c in corrections {
                            push_unique(&mut exp.fallback, c);
                        }
                    }
                }
                Synonym::Placeholder {
                    placeholder,
                    replacements,
                    ..
                } => {
                    if replacements.iter().any(|r| r.eq_ignore_ascii_case(token)) {
                        push_unique(&mut exp.primary, placeholder);
                    }
                }
            }
        }
        exp
    }
}

fn push_unique(terms: &mut Vec<String>, term: &str) {
    let lowered = term.to_lowercase();
    if !terms.iter().any(|t| *t == lowered) {
        terms.push(lowered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> SynonymSet {
        let mut s = SynonymSet::default();
        s.upsert(Synonym::Regular {
            object_id: "syn1".into(),
            synonyms: vec!["laptop".into(), "notebook".into()],
        });
        s.upsert(Synonym::OneWay {
            object_id: "syn2".into(),
            input: "phone".into(),
            synonyms: vec!["smartphone".into()],
        });
        s.upsert(Synonym::AltCorrection1 {
            object_id: "syn3".into(),
            word: "iphone".into(),
            corrections: vec!["ephone".into()],
        });
        s.upsert(Synonym::Placeholder {
            object_id: "syn4".into(),
            placeholder: "<street>".into(),
            replacements: vec!["st".into(), "street".into()],
        });
        s
    }

    #[test]
    fn regular_synonyms_are_symmetric() {
        let s = set();
        assert!(s.expand("laptop").primary.contains(&"notebook".to_string()));
        assert!(s.expand("notebook").primary.contains(&"laptop".to_string()));
    }

    #[test]
    fn one_way_expands_only_forward() {
        let s = set();
        assert!(s.expand("phone").primary.contains(&"smartphone".to_string()));
        assert_eq!(s.expand("smartphone").primary, vec!["smartphone"]);
    }

    #[test]
    fn alt_corrections_land_in_fallback_tier() {
        let s = set();
        let exp = s.expand("iphone");
        assert_eq!(exp.primary, vec!["iphone"]);
        assert_eq!(exp.fallback, vec!["ephone"]);
    }

    #[test]
    fn placeholder_replacement_maps_to_token() {
        let s = set();
        assert!(s.expand("st").primary.contains(&"<street>".to_string()));
    }

    #[test]
    fn upsert_replaces_and_delete_removes() {
        let mut s = set();
        s.upsert(Synonym::Regular {
            object_id: "syn1".into(),
            synonyms: vec!["tv".into(), "television".into()],
        });
        assert_eq!(s.len(), 4);
        assert!(s.expand("laptop").primary.len() == 1);
        assert!(s.delete("syn1"));
        assert!(!s.delete("syn1"));
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn paged_search() {
        let s = set();
        let (hits, total) = s.search("", 0, 2);
        assert_eq!(total, 4);
        assert_eq!(hits.len(), 2);
        let (hits, total) = s.search("laptop", 0, 10);
        assert_eq!(total, 1);
        assert_eq!(hits[0].object_id(), "syn1");
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synonyms.json");
        let s = set();
        s.save(&path).unwrap();
        let loaded = SynonymSet::load(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.get("syn2"), s.get("syn2"));
    }
}
