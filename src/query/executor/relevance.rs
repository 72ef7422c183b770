use crate::schema::{RankingDirection, RankingRule, Schema};
use crate::types::{Document, FieldValue};
use std::cmp::Ordering;

/// Gaps between matched tokens wider than this count the same.
const PROXIMITY_CAP: u32 = 8;

/// One query token after synonym expansion.
#[derive(Debug, Clone)]
pub struct QueryToken {
    /// Equivalent terms, lowercased; the original token is first.
    pub variants: Vec<String>,
    /// The last token of a query also matches as a prefix.
    pub prefix: bool,
}

impl QueryToken {
    /// Maximum edit distance allowed for a term of this length.
    pub fn typo_allowance(term: &str) -> u32 {
        let len = term.chars().count();
        if len >= 8 {
            2
        } else if len >= 4 {
            1
        } else {
            0
        }
    }
}

/// Textual relevance criteria, compared lexicographically.
///
/// Matched words descending, then typos ascending, proximity ascending,
/// best attribute position ascending, exact-word count descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextualScore {
    pub words: usize,
    pub typos: u32,
    pub proximity: u32,
    pub attribute: usize,
    pub exact: usize,
}

impl TextualScore {
    pub fn zero() -> Self {
        TextualScore {
            words: 0,
            typos: 0,
            proximity: 0,
            attribute: usize::MAX,
            exact: 0,
        }
    }

    pub fn compare(&self, other: &TextualScore) -> Ordering {
        other
            .words
            .cmp(&self.words)
            .then(self.typos.cmp(&other.typos))
            .then(self.proximity.cmp(&other.proximity))
            .then(self.attribute.cmp(&other.attribute))
            .then(other.exact.cmp(&self.exact))
    }
}

/// How one query token matched inside one attribute.
struct TokenMatch {
    typos: u32,
    exact: bool,
    position: u32,
}

/// Score a document against the expanded query tokens.
///
/// Searchable attributes are scanned in schema priority order; a token's
/// best match decides its typo cost, and the earliest attribute holding a
/// match becomes the attribute criterion.
pub fn score_document(doc: &Document, schema: &Schema, tokens: &[QueryToken]) -> TextualScore {
    if tokens.is_empty() {
        return TextualScore::zero();
    }

    let attributes = attribute_token_streams(doc, schema);
    let mut score = TextualScore::zero();
    let mut matched_positions: Vec<Option<(usize, u32)>> = vec![None; tokens.len()];

    for (token_idx, token) in tokens.iter().enumerate() {
        let mut best: Option<(usize, TokenMatch)> = None;
        for (attr_idx, words) in attributes.iter().enumerate() {
            if let Some(m) = best_match_in(token, words) {
                let better = match &best {
                    None => true,
                    Some((_, prev)) => m.typos < prev.typos,
                };
                if better {
                    best = Some((attr_idx, m));
                }
            }
        }
        if let Some((attr_idx, m)) = best {
            score.words += 1;
            score.typos += m.typos;
            if m.exact {
                score.exact += 1;
            }
            score.attribute = score.attribute.min(attr_idx);
            matched_positions[token_idx] = Some((attr_idx, m.position));
        }
    }

    // Proximity: gap between consecutive matched tokens when they land in
    // the same attribute, capped; a cross-attribute pair costs the cap.
    let mut prev: Option<(usize, u32)> = None;
    for slot in matched_positions.into_iter().flatten() {
        if let Some((prev_attr, prev_pos)) = prev {
            if prev_attr == slot.0 {
                score.proximity += slot.1.abs_diff(prev_pos).min(PROXIMITY_CAP);
            } else {
                score.proximity += PROXIMITY_CAP;
            }
        }
        prev = Some(slot);
    }

    score
}

fn best_match_in(token: &QueryToken, words: &[String]) -> Option<TokenMatch> {
    let mut best: Option<TokenMatch> = None;
    for (pos, word) in words.iter().enumerate() {
        for variant in &token.variants {
            let candidate = if word == variant {
                Some(TokenMatch {
                    typos: 0,
                    exact: true,
                    position: pos as u32,
                })
            } else if token.prefix && word.starts_with(variant.as_str()) {
                Some(TokenMatch {
                    typos: 0,
                    exact: false,
                    position: pos as u32,
                })
            } else {
                let allowance = QueryToken::typo_allowance(variant);
                if allowance == 0 {
                    None
                } else {
                    let dist = strsim::levenshtein(word, variant) as u32;
                    (dist <= allowance).then_some(TokenMatch {
                        typos: dist,
                        exact: false,
                        position: pos as u32,
                    })
                }
            };
            if let Some(m) = candidate {
                let better = match &best {
                    None => true,
                    Some(prev) => m.typos < prev.typos || (m.typos == prev.typos && m.exact && !prev.exact),
                };
                if better {
                    best = Some(m);
                }
            }
        }
    }
    best
}

/// Per-attribute word streams in schema priority order. An empty schema
/// yields a single stream over every text field.
fn attribute_token_streams(doc: &Document, schema: &Schema) -> Vec<Vec<String>> {
    let chunks_for = |attr: &str| -> Vec<String> {
        doc.get_path(attr)
            .map(|v| {
                let mut chunks = Vec::new();
                collect_words(v, &mut chunks);
                chunks
            })
            .unwrap_or_default()
    };

    if schema.searchable_attributes.is_empty() {
        let text = crate::index::document::searchable_text(doc, schema);
        vec![text.iter().flat_map(|s| tokenize(s)).collect()]
    } else {
        schema
            .searchable_attributes
            .iter()
            .map(|attr| chunks_for(attr))
            .collect()
    }
}

fn collect_words(value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::Text(s) => out.extend(tokenize(s)),
        FieldValue::Array(items) => {
            for item in items {
                collect_words(item, out);
            }
        }
        _ => {}
    }
}

/// Lowercased alphanumeric word split, matching the index-side tokenizer.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// A custom-ranking attribute value with missing-last ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum RankValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Missing,
}

impl RankValue {
    pub fn of(doc: &Document, attr: &str) -> RankValue {
        match doc.get_path(attr) {
            Some(FieldValue::Integer(i)) => RankValue::Number(*i as f64),
            Some(FieldValue::Float(f)) => RankValue::Number(*f),
            Some(FieldValue::Text(s)) => RankValue::Text(s.clone()),
            Some(FieldValue::Bool(b)) => RankValue::Bool(*b),
            _ => RankValue::Missing,
        }
    }

    /// Ordering under one direction. Documents missing the attribute sort
    /// after present ones in either direction.
    pub fn compare(&self, other: &RankValue, direction: RankingDirection) -> Ordering {
        use RankValue::*;
        let ord = match (self, other) {
            (Missing, Missing) => return Ordering::Equal,
            (Missing, _) => return Ordering::Greater,
            (_, Missing) => return Ordering::Less,
            (Number(a), Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Text(a), Text(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            // Mixed kinds: numbers sort before text, text before bools.
            (Number(_), _) => Ordering::Less,
            (_, Number(_)) => Ordering::Greater,
            (Text(_), Bool(_)) => Ordering::Less,
            (Bool(_), Text(_)) => Ordering::Greater,
        };
        match direction {
            RankingDirection::Asc => ord,
            RankingDirection::Desc => ord.reverse(),
        }
    }
}

/// The full deterministic ranking comparator.
///
/// Textual criteria first, then each custom-ranking rule in declared order,
/// with objectID ascending as the final tie-break.
pub fn compare_ranked(
    a: &Document,
    a_score: &TextualScore,
    b: &Document,
    b_score: &TextualScore,
    rules: &[RankingRule],
) -> Ordering {
    let mut ord = a_score.compare(b_score);
    for rule in rules {
        if ord != Ordering::Equal {
            break;
        }
        ord = RankValue::of(a, &rule.attribute).compare(
            &RankValue::of(b, &rule.attribute),
            rule.direction,
        );
    }
    ord.then_with(|| a.id.cmp(&b.id))
}
