use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Per-tenant schema declaration, persisted as `schema.json` in the tenant
/// directory.
///
/// Changes take effect on the next committed segment: already-committed
/// segments keep their indexed text, only query-time interpretation
/// (ranking, faceting) follows the new schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Schema {
    /// Searchable attributes in priority order; the position of the first
    /// attribute a query term matches in is a ranking criterion. Empty means
    /// "index every text field".
    #[serde(rename = "searchableAttributes")]
    pub searchable_attributes: Vec<String>,

    /// Faceting attributes, optionally wrapped in `filterOnly(...)` or
    /// `searchable(...)` modifiers (Algolia convention).
    #[serde(rename = "attributesForFaceting")]
    pub attributes_for_faceting: Vec<String>,

    /// Ordered tie-break rules applied after textual relevance, as
    /// `asc(attr)` / `desc(attr)` entries.
    #[serde(rename = "customRanking")]
    pub custom_ranking: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            searchable_attributes: Vec::new(),
            attributes_for_faceting: Vec::new(),
            custom_ranking: Vec::new(),
        }
    }
}

/// Direction of one custom-ranking tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingDirection {
    Asc,
    Desc,
}

/// One parsed `asc(attr)` / `desc(attr)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingRule {
    pub attribute: String,
    pub direction: RankingDirection,
}

impl RankingRule {
    /// Parse a single spec; returns `None` for anything that is not
    /// `asc(...)` or `desc(...)`.
    pub fn parse(spec: &str) -> Option<RankingRule> {
        if let Some(attr) = spec.strip_prefix("asc(") {
            Some(RankingRule {
                attribute: attr.trim_end_matches(')').to_string(),
                direction: RankingDirection::Asc,
            })
        } else {
            spec.strip_prefix("desc(").map(|attr| RankingRule {
                attribute: attr.trim_end_matches(')').to_string(),
                direction: RankingDirection::Desc,
            })
        }
    }

    pub fn parse_all(specs: &[String]) -> Vec<RankingRule> {
        specs.iter().filter_map(|s| RankingRule::parse(s)).collect()
    }
}

impl Schema {
    pub fn load<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// All faceting attribute names with modifiers stripped.
    pub fn facet_attributes(&self) -> HashSet<String> {
        self.attributes_for_faceting
            .iter()
            .map(|s| strip_facet_modifier(s).to_string())
            .collect()
    }

    /// Attributes declared `filterOnly(...)`: usable in filters, excluded
    /// from facet-count requests and from relevance.
    pub fn filter_only_attributes(&self) -> HashSet<String> {
        self.attributes_for_faceting
            .iter()
            .filter(|s| s.starts_with("filterOnly("))
            .map(|s| strip_facet_modifier(s).to_string())
            .collect()
    }

    /// Whether facet counts may be requested for `attr`.
    pub fn is_countable_facet(&self, attr: &str) -> bool {
        self.attributes_for_faceting.iter().any(|s| {
            strip_facet_modifier(s) == attr && !s.starts_with("filterOnly(")
        })
    }

    /// The parsed custom-ranking tie-breakers, in declared order.
    pub fn ranking_rules(&self) -> Vec<RankingRule> {
        RankingRule::parse_all(&self.custom_ranking)
    }
}

fn strip_facet_modifier(attr: &str) -> &str {
    for prefix in ["filterOnly(", "searchable("] {
        if let Some(stripped) = attr.strip_prefix(prefix) {
            return stripped.trim_end_matches(')');
        }
    }
    attr
}
