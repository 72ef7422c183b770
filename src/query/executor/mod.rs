pub mod facets;
pub mod relevance;

use crate::error::Result;
use crate::index::rules::RuleSet;
use crate::index::synonyms::SynonymSet;
use crate::index::Index;
use crate::query::filter::FilterExpr;
use crate::schema::Schema;
use crate::types::{Document, FacetCounts, Hit, SearchResult};
use facets::FacetCache;
use relevance::{compare_ranked, score_document, tokenize, QueryToken, TextualScore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tantivy::collector::DocSetCollector;
use tantivy::query::{AllQuery, BooleanQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Term};
use tantivy::TantivyDocument;
use tracing::debug;

/// One search request against a tenant.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub filters: Option<String>,
    pub facets: Vec<String>,
    pub page: usize,
    pub hits_per_page: usize,
    /// Per-request replacement for the schema's custom ranking, as
    /// `asc(attr)` / `desc(attr)` entries.
    pub custom_ranking: Option<Vec<String>>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: String::new(),
            filters: None,
            facets: Vec::new(),
            page: 0,
            hits_per_page: 20,
            custom_ranking: None,
        }
    }
}

impl SearchRequest {
    pub fn query(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Run the full query pipeline against one tenant's committed view.
///
/// Stages: rule query rewrite, synonym expansion, candidate retrieval from
/// tantivy, filter evaluation over the forward store, relevance ranking,
/// facet counting (cached), rule hides and pins, pagination.
pub fn execute(
    index: &Index,
    schema: &Schema,
    synonyms: &SynonymSet,
    rules: &RuleSet,
    cache: &FacetCache,
    request: &SearchRequest,
) -> Result<SearchResult> {
    let started = Instant::now();
    let hits_per_page = request.hits_per_page.max(1);

    let effects = rules.effects(&request.query);
    let query_text = effects.rewrite.as_deref().unwrap_or(&request.query);

    let filter = match &request.filters {
        Some(f) if !f.trim().is_empty() => Some(FilterExpr::parse(f)?),
        _ => None,
    };

    let ranking_rules = match &request.custom_ranking {
        Some(specs) => crate::schema::RankingRule::parse_all(specs),
        None => schema.ranking_rules(),
    };

    let (primary_tokens, fallback_tokens) = build_tokens(query_text, synonyms);

    let mut candidates = retrieve(index, schema, &primary_tokens, filter.as_ref())?;
    sort_candidates(&mut candidates, &ranking_rules);

    // Facet counts come from the primary tier only: whether the fallback
    // tier joins depends on the page size, which is not part of the cache
    // key, and counts must not vary with pagination.
    let facet_counts = facet_counts(
        index.tenant(),
        query_text,
        &candidates,
        &request.facets,
        filter.as_ref(),
        schema,
        cache,
    );

    // Alt-correction variants are a fallback tier: consulted only when the
    // primary pass cannot fill the first page, ranked after every primary
    // hit.
    if candidates.len() < hits_per_page {
        if let Some(fallback_tokens) = fallback_tokens {
            let seen: HashSet<String> = candidates.iter().map(|c| c.doc.id.clone()).collect();
            let mut extra = retrieve(index, schema, &fallback_tokens, filter.as_ref())?;
            extra.retain(|c| !seen.contains(&c.doc.id));
            sort_candidates(&mut extra, &ranking_rules);
            candidates.extend(extra);
        }
    }

    // Hides apply before pins so a rule can never pin a hidden document.
    if !effects.hidden.is_empty() {
        candidates.retain(|c| !effects.hidden.contains(&c.doc.id));
    }
    let mut ranked: Vec<(Document, f32)> = candidates
        .into_iter()
        .map(|c| (c.doc, c.score.words as f32))
        .collect();
    for pin in &effects.pins {
        // A hidden id stays hidden even when another rule promotes it.
        if effects.hidden.contains(&pin.object_id) {
            continue;
        }
        let entry = match ranked.iter().position(|(d, _)| d.id == pin.object_id) {
            Some(idx) => Some(ranked.remove(idx)),
            None => index.get_document(&pin.object_id)?.map(|d| (d, 0.0)),
        };
        if let Some(entry) = entry {
            let at = pin.position.min(ranked.len());
            ranked.insert(at, entry);
        }
    }

    let nb_hits = ranked.len();
    let nb_pages = nb_hits.div_ceil(hits_per_page);
    let hits: Vec<Hit> = ranked
        .into_iter()
        .skip(request.page * hits_per_page)
        .take(hits_per_page)
        .map(|(document, score)| Hit { document, score })
        .collect();

    debug!(
        tenant = index.tenant(),
        query = query_text,
        nb_hits,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "search executed"
    );

    Ok(SearchResult {
        hits,
        nb_hits,
        nb_pages,
        page: request.page,
        processing_time_ms: started.elapsed().as_millis() as u64,
        facets: facet_counts,
    })
}

struct Candidate {
    doc: Document,
    score: TextualScore,
}

/// Expand the query into per-token variant sets.
///
/// The second element carries the fallback tier (primary variants plus
/// alt-corrections) and is `None` when no token has corrections.
fn build_tokens(
    query: &str,
    synonyms: &SynonymSet,
) -> (Vec<QueryToken>, Option<Vec<QueryToken>>) {
    let words = tokenize(query);
    let mut primary = Vec::with_capacity(words.len());
    let mut fallback = Vec::with_capacity(words.len());
    let mut has_fallback = false;

    for (i, word) in words.iter().enumerate() {
        let is_last = i + 1 == words.len();
        let expansion = synonyms.expand(word);
        if !expansion.fallback.is_empty() {
            has_fallback = true;
        }
        let mut all = expansion.primary.clone();
        all.extend(expansion.fallback);
        primary.push(QueryToken {
            variants: expansion.primary,
            prefix: is_last,
        });
        fallback.push(QueryToken {
            variants: all,
            prefix: is_last,
        });
    }
    (primary, has_fallback.then_some(fallback))
}

/// Fetch, filter, and score the candidate set for one token tier.
fn retrieve(
    index: &Index,
    schema: &Schema,
    tokens: &[QueryToken],
    filter: Option<&FilterExpr>,
) -> Result<Vec<Candidate>> {
    let searcher = index.searcher();
    let query = build_tantivy_query(index, tokens);
    let addresses = searcher.search(&query, &DocSetCollector)?;

    let mut candidates = Vec::new();
    for addr in addresses {
        let tdoc: TantivyDocument = searcher.doc(addr)?;
        let doc = index.converter().from_tantivy(&tdoc)?;
        if let Some(filter) = filter {
            if !filter.evaluate(&doc) {
                continue;
            }
        }
        let score = score_document(&doc, schema, tokens);
        candidates.push(Candidate { doc, score });
    }
    Ok(candidates)
}

fn build_tantivy_query(index: &Index, tokens: &[QueryToken]) -> Box<dyn Query> {
    if tokens.is_empty() {
        return Box::new(AllQuery);
    }
    let all_field = index.converter().all_field();
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for token in tokens {
        for variant in &token.variants {
            let term = Term::from_field_text(all_field, variant);
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(term.clone(), IndexRecordOption::Basic)),
            ));
            let allowance = QueryToken::typo_allowance(variant) as u8;
            if allowance > 0 {
                clauses.push((
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new(term.clone(), allowance, true)),
                ));
            }
            if token.prefix {
                clauses.push((
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new_prefix(term, allowance, true)),
                ));
            }
        }
    }
    Box::new(BooleanQuery::new(clauses))
}

fn sort_candidates(candidates: &mut [Candidate], rules: &[crate::schema::RankingRule]) {
    candidates.sort_by(|a, b| compare_ranked(&a.doc, &a.score, &b.doc, &b.score, rules));
}

#[allow(clippy::too_many_arguments)]
fn facet_counts(
    tenant: &str,
    query: &str,
    candidates: &[Candidate],
    requested: &[String],
    filter: Option<&FilterExpr>,
    schema: &Schema,
    cache: &FacetCache,
) -> FacetCounts {
    if requested.is_empty() {
        return FacetCounts::new();
    }
    let fingerprint = filter.map(FilterExpr::fingerprint).unwrap_or_default();
    let key = FacetCache::key(tenant, query, &fingerprint, requested);
    if let Some(cached) = cache.get(&key) {
        return (*cached).clone();
    }
    let refs: Vec<&Document> = candidates.iter().map(|c| &c.doc).collect();
    let counts = facets::count_facets(&refs, requested, schema);
    cache.insert(key, Arc::new(counts.clone()));
    counts
}
