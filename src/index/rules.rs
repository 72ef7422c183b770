use crate::error::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// How a rule condition anchors against the raw query string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Anchoring {
    Is,
    StartsWith,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub pattern: String,
    pub anchoring: Anchoring,
}

impl Condition {
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        let pattern = self.pattern.to_lowercase();
        match self.anchoring {
            Anchoring::Is => query == pattern,
            Anchoring::StartsWith => query.starts_with(&pattern),
            Anchoring::Contains => query.contains(&pattern),
        }
    }
}

/// Pin one document to a zero-based result position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HiddenObject {
    #[serde(rename = "objectID")]
    pub object_id: String,
}

/// Optional query rewrite carried by a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsequenceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Consequence {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promote: Vec<Promotion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hide: Vec<HiddenObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ConsequenceParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub condition: Condition,
    pub consequence: Consequence,
}

/// Which rule wins when several pin documents to the same position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Later-saved rules apply last, so their pins land on top.
    #[default]
    LastSaved,
    FirstSaved,
}

/// The merged consequences of every rule matching one query.
#[derive(Debug, Clone, Default)]
pub struct RuleEffects {
    /// Pins in application order; apply sequentially, inserting each id at
    /// its position.
    pub pins: Vec<Promotion>,
    pub hidden: HashSet<String>,
    pub rewrite: Option<String>,
}

/// A tenant's query rules, in save order, persisted as `rules.json`.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: IndexMap<String, Rule>,
    policy: ConflictPolicy,
}

impl RuleSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(RuleSet::default());
        }
        let content = std::fs::read_to_string(path)?;
        let list: Vec<Rule> = serde_json::from_str(&content)?;
        let mut rules = IndexMap::new();
        for rule in list {
            rules.insert(rule.object_id.clone(), rule);
        }
        Ok(RuleSet {
            rules,
            policy: ConflictPolicy::default(),
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let list: Vec<&Rule> = self.rules.values().collect();
        std::fs::write(path, serde_json::to_string_pretty(&list)?)?;
        Ok(())
    }

    pub fn set_policy(&mut self, policy: ConflictPolicy) {
        self.policy = policy;
    }

    /// Insert or replace by objectID. A replaced rule moves to the end of
    /// the save order, which matters for conflict resolution.
    pub fn upsert(&mut self, rule: Rule) {
        self.rules.shift_remove(&rule.object_id);
        self.rules.insert(rule.object_id.clone(), rule);
    }

    pub fn get(&self, object_id: &str) -> Option<&Rule> {
        self.rules.get(object_id)
    }

    pub fn delete(&mut self, object_id: &str) -> bool {
        self.rules.shift_remove(object_id).is_some()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Paged listing filtered by a substring match on objectID or pattern.
    pub fn search(&self, query: &str, page: usize, hits_per_page: usize) -> (Vec<Rule>, usize) {
        let needle = query.to_lowercase();
        let matched: Vec<&Rule> = self
            .rules
            .values()
            .filter(|r| {
                needle.is_empty()
                    || r.object_id.to_lowercase().contains(&needle)
                    || r.condition.pattern.to_lowercase().contains(&needle)
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

    /// Merge the consequences of every rule matching `query`.
    ///
    /// Pins come out in application order under the conflict policy: with
    /// `LastSaved`, later-saved rules are applied later and their insert at
    /// a contested position lands first. The first matching rewrite in
    /// application order wins.
    pub fn effects(&self, query: &str) -> RuleEffects {
        let mut effects = RuleEffects::default();
        let matching: Vec<&Rule> = self
            .rules
            .values()
            .filter(|r| r.condition.matches(query))
            .collect();
        let ordered: Vec<&Rule> = match self.policy {
            ConflictPolicy::LastSaved => matching,
            ConflictPolicy::FirstSaved => matching.into_iter().rev().collect(),
        };
        for rule in ordered {
            for hide in &rule.consequence.hide {
                effects.hidden.insert(hide.object_id.clone());
            }
            for pin in &rule.consequence.promote {
                effects.pins.push(pin.clone());
            }
            if effects.rewrite.is_none() {
                if let Some(params) = &rule.consequence.params {
                    effects.rewrite = params.query.clone();
                }
            }
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin_rule(id: &str, pattern: &str, doc: &str, position: usize) -> Rule {
        Rule {
            object_id: id.to_string(),
            condition: Condition {
                pattern: pattern.to_string(),
                anchoring: Anchoring::Contains,
            },
            consequence: Consequence {
                promote: vec![Promotion {
                    object_id: doc.to_string(),
                    position,
                }],
                ..Default::default()
            },
        }
    }

    #[test]
    fn anchoring_semantics() {
        let is = Condition {
            pattern: "tv".into(),
            anchoring: Anchoring::Is,
        };
        assert!(is.matches("TV"));
        assert!(!is.matches("tv stand"));

        let starts = Condition {
            pattern: "tv".into(),
            anchoring: Anchoring::StartsWith,
        };
        assert!(starts.matches("tv stand"));
        assert!(!starts.matches("smart tv"));

        let contains = Condition {
            pattern: "tv".into(),
            anchoring: Anchoring::Contains,
        };
        assert!(contains.matches("smart tv stand"));
    }

    #[test]
    fn last_saved_pins_apply_last() {
        let mut rs = RuleSet::default();
        rs.upsert(pin_rule("r1", "tv", "doc-a", 0));
        rs.upsert(pin_rule("r2", "tv", "doc-b", 0));
        let effects = rs.effects("tv");
        // Application order follows save order, so doc-b inserts at 0 last.
        assert_eq!(effects.pins[0].object_id, "doc-a");
        assert_eq!(effects.pins[1].object_id, "doc-b");
    }

    #[test]
    fn first_saved_policy_reverses_application() {
        let mut rs = RuleSet::default();
        rs.set_policy(ConflictPolicy::FirstSaved);
        rs.upsert(pin_rule("r1", "tv", "doc-a", 0));
        rs.upsert(pin_rule("r2", "tv", "doc-b", 0));
        let effects = rs.effects("tv");
        assert_eq!(effects.pins[0].object_id, "doc-b");
        assert_eq!(effects.pins[1].object_id, "doc-a");
    }

    #[test]
    fn resave_moves_rule_to_end_of_order() {
        let mut rs = RuleSet::default();
        rs.upsert(pin_rule("r1", "tv", "doc-a", 0));
        rs.upsert(pin_rule("r2", "tv", "doc-b", 0));
        rs.upsert(pin_rule("r1", "tv", "doc-a", 0));
        let effects = rs.effects("tv");
        assert_eq!(effects.pins[1].object_id, "doc-a");
    }

    #[test]
    fn hide_and_rewrite_merge() {
        let mut rs = RuleSet::default();
        rs.upsert(Rule {
            object_id: "r1".into(),
            condition: Condition {
                pattern: "cheap tv".into(),
                anchoring: Anchoring::Is,
            },
            consequence: Consequence {
                hide: vec![HiddenObject {
                    object_id: "doc-x".into(),
                }],
                params: Some(ConsequenceParams {
                    query: Some("tv".into()),
                }),
                ..Default::default()
            },
        });
        let effects = rs.effects("cheap tv");
        assert!(effects.hidden.contains("doc-x"));
        assert_eq!(effects.rewrite.as_deref(), Some("tv"));
        assert!(rs.effects("laptop").hidden.is_empty());
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut rs = RuleSet::default();
        rs.upsert(pin_rule("r1", "tv", "doc-a", 2));
        rs.save(&path).unwrap();
        let loaded = RuleSet::load(&path).unwrap();
        assert_eq!(loaded.get("r1"), rs.get("r1"));
    }
}
