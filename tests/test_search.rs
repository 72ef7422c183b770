use quern::index::rules::{
    Anchoring, Condition, Consequence, ConsequenceParams, HiddenObject, Promotion, Rule,
};
use quern::index::synonyms::Synonym;
use quern::{
    Document, IndexManager, MemoryBudget, QuernError, Schema, SearchRequest, WriteAction,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn doc(json: serde_json::Value) -> Document {
    Document::from_json(&json).unwrap()
}

async fn catalog(dir: &tempfile::TempDir) -> Arc<IndexManager> {
    let m = IndexManager::with_budget(
        dir.path(),
        MemoryBudget::with_limits(32 * 1024 * 1024, 8, 3 * 1024 * 1024),
    )
    .unwrap();
    m.create_tenant("shop").unwrap();
    m.set_schema(
        "shop",
        Schema {
            searchable_attributes: vec!["title".to_string(), "description".to_string()],
            attributes_for_faceting: vec![
                "brand".to_string(),
                "category".to_string(),
                "filterOnly(price)".to_string(),
            ],
            custom_ranking: vec!["desc(popularity)".to_string()],
        },
    )
    .unwrap();

    let docs = vec![
        json!({"objectID": "1", "title": "MacBook Pro laptop", "brand": "Apple",
               "category": "laptops", "price": 2399, "popularity": 90}),
        json!({"objectID": "2", "title": "ThinkPad laptop", "brand": "Lenovo",
               "category": "laptops", "price": 1399, "popularity": 70}),
        json!({"objectID": "3", "title": "iPhone 15", "brand": "Apple",
               "category": "phones", "price": 999, "popularity": 95}),
        json!({"objectID": "4", "title": "Galaxy phone", "brand": "Samsung",
               "category": "phones", "price": 899, "popularity": 60}),
        json!({"objectID": "5", "title": "Budget notebook", "brand": "Acer",
               "category": "laptops", "price": 499, "popularity": 40}),
    ];
    let actions = docs.into_iter().map(|j| WriteAction::Upsert(doc(j))).collect();
    let task = m.enqueue_write("shop", actions).unwrap();
    m.wait_for_task(&task.id, Duration::from_secs(5)).await.unwrap();
    m
}

#[tokio::test]
async fn filters_restrict_results() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    let request = SearchRequest {
        query: "laptop".to_string(),
        filters: Some("brand:Apple".to_string()),
        ..Default::default()
    };
    let results = m.search("shop", &request).unwrap();
    assert_eq!(results.nb_hits, 1);
    assert_eq!(results.hits[0].document.id, "1");

    let request = SearchRequest {
        filters: Some("price < 1000 AND category:phones".to_string()),
        ..Default::default()
    };
    let results = m.search("shop", &request).unwrap();
    assert_eq!(results.nb_hits, 2);

    let request = SearchRequest {
        filters: Some("price:899 TO 999".to_string()),
        ..Default::default()
    };
    assert_eq!(m.search("shop", &request).unwrap().nb_hits, 2);
}

#[tokio::test]
async fn invalid_filter_is_a_synchronous_error() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;
    let request = SearchRequest {
        filters: Some("price >>> 10".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        m.search("shop", &request),
        Err(QuernError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn facet_counts_respect_declarations() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    let request = SearchRequest {
        facets: vec!["brand".to_string(), "price".to_string()],
        ..Default::default()
    };
    let results = m.search("shop", &request).unwrap();

    let brands = &results.facets["brand"];
    assert_eq!(brands[0].value, "Apple");
    assert_eq!(brands[0].count, 2);
    // filterOnly attributes are filterable but never counted.
    assert!(!results.facets.contains_key("price"));

    // A second identical request is served from the facet cache and must
    // agree with the direct computation.
    let cached = m.search("shop", &request).unwrap();
    assert_eq!(cached.facets, results.facets);
}

#[tokio::test]
async fn facet_cache_invalidates_on_publish() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    let request = SearchRequest {
        facets: vec!["brand".to_string()],
        ..Default::default()
    };
    let before = m.search("shop", &request).unwrap();
    assert_eq!(before.facets["brand"][0].count, 2);

    let task = m
        .enqueue_write(
            "shop",
            vec![WriteAction::Upsert(doc(json!({
                "objectID": "6", "title": "iPad", "brand": "Apple",
                "category": "tablets", "price": 799, "popularity": 80
            })))],
        )
        .unwrap();
    m.wait_for_task(&task.id, Duration::from_secs(5)).await.unwrap();

    let after = m.search("shop", &request).unwrap();
    assert_eq!(after.facets["brand"][0].count, 3);
}

#[tokio::test]
async fn synonyms_expand_queries() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    m.save_synonym(
        "shop",
        Synonym::Regular {
            object_id: "syn1".into(),
            synonyms: vec!["laptop".into(), "notebook".into()],
        },
    )
    .unwrap();

    // "notebook" now also retrieves documents that only say "laptop".
    let results = m.search("shop", &SearchRequest::query("notebook")).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.document.id.as_str()).collect();
    assert!(ids.contains(&"1"));
    assert!(ids.contains(&"2"));
    assert!(ids.contains(&"5"));

    m.delete_synonym("shop", "syn1").unwrap();
    let results = m.search("shop", &SearchRequest::query("notebook")).unwrap();
    assert_eq!(results.nb_hits, 1);
    assert_eq!(results.hits[0].document.id, "5");
}

#[tokio::test]
async fn alt_corrections_fill_underfull_pages_only() {
    let dir = tempfile::tempdir().unwrap();
    let m = IndexManager::with_budget(
        dir.path(),
        MemoryBudget::with_limits(32 * 1024 * 1024, 8, 3 * 1024 * 1024),
    )
    .unwrap();
    m.create_tenant("t").unwrap();

    let task = m
        .enqueue_write(
            "t",
            vec![
                // "z" sorts after "a", so ordering below proves tiering.
                WriteAction::Upsert(doc(json!({"objectID": "z", "title": "telefon handset"}))),
                WriteAction::Upsert(doc(json!({"objectID": "a", "title": "phone handset"}))),
            ],
        )
        .unwrap();
    m.wait_for_task(&task.id, Duration::from_secs(5)).await.unwrap();

    m.save_synonym(
        "t",
        quern::Synonym::AltCorrection1 {
            object_id: "alt1".into(),
            word: "telefon".into(),
            corrections: vec!["phone".into()],
        },
    )
    .unwrap();

    // The primary pass underfills the default page, so the corrected term
    // joins — ranked strictly after the primary hit.
    let results = m.search("t", &SearchRequest::query("telefon")).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.document.id.as_str()).collect();
    assert_eq!(ids, vec!["z", "a"]);

    // A page the primary pass can fill never consults the corrections.
    let request = SearchRequest {
        query: "telefon".to_string(),
        hits_per_page: 1,
        ..Default::default()
    };
    let results = m.search("t", &request).unwrap();
    assert_eq!(results.nb_hits, 1);
    assert_eq!(results.hits[0].document.id, "z");
}

#[tokio::test]
async fn facet_counts_do_not_vary_with_page_size() {
    let dir = tempfile::tempdir().unwrap();
    let m = IndexManager::with_budget(
        dir.path(),
        MemoryBudget::with_limits(32 * 1024 * 1024, 8, 3 * 1024 * 1024),
    )
    .unwrap();
    m.create_tenant("t").unwrap();
    m.set_schema(
        "t",
        Schema {
            attributes_for_faceting: vec!["brand".to_string()],
            ..Default::default()
        },
    )
    .unwrap();

    let task = m
        .enqueue_write(
            "t",
            vec![
                WriteAction::Upsert(doc(json!({"objectID": "z", "title": "telefon", "brand": "Nokia"}))),
                WriteAction::Upsert(doc(json!({"objectID": "a", "title": "phone", "brand": "Sony"}))),
            ],
        )
        .unwrap();
    m.wait_for_task(&task.id, Duration::from_secs(5)).await.unwrap();

    m.save_synonym(
        "t",
        Synonym::AltCorrection1 {
            object_id: "alt1".into(),
            word: "telefon".into(),
            corrections: vec!["phone".into()],
        },
    )
    .unwrap();

    // Counts reflect the primary match set only, so a page size that lets
    // the correction tier join must not change them.
    let wide = SearchRequest {
        query: "telefon".to_string(),
        facets: vec!["brand".to_string()],
        ..Default::default()
    };
    let narrow = SearchRequest {
        hits_per_page: 1,
        ..wide.clone()
    };
    let wide_results = m.search("t", &wide).unwrap();
    let narrow_results = m.search("t", &narrow).unwrap();

    assert_eq!(wide_results.facets["brand"].len(), 1);
    assert_eq!(wide_results.facets["brand"][0].value, "Nokia");
    assert_eq!(wide_results.facets, narrow_results.facets);
}

#[tokio::test]
async fn synonym_crud_and_listing() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    m.save_synonym(
        "shop",
        Synonym::OneWay {
            object_id: "syn-phone".into(),
            input: "mobile".into(),
            synonyms: vec!["phone".into()],
        },
    )
    .unwrap();
    assert!(m.get_synonym("shop", "syn-phone").unwrap().is_some());

    let (hits, total) = m.search_synonyms("shop", "mobile", 0, 10).unwrap();
    assert_eq!(total, 1);
    assert_eq!(hits[0].object_id(), "syn-phone");

    m.clear_synonyms("shop").unwrap();
    let (_, total) = m.search_synonyms("shop", "", 0, 10).unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn rules_pin_and_hide() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    m.save_rule(
        "shop",
        Rule {
            object_id: "pin-acer".into(),
            condition: Condition {
                pattern: "laptop".into(),
                anchoring: Anchoring::Contains,
            },
            consequence: Consequence {
                promote: vec![Promotion {
                    object_id: "5".into(),
                    position: 0,
                }],
                hide: vec![HiddenObject {
                    object_id: "2".into(),
                }],
                ..Default::default()
            },
        },
    )
    .unwrap();

    let results = m.search("shop", &SearchRequest::query("laptop")).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.document.id.as_str()).collect();
    assert_eq!(ids[0], "5");
    assert!(!ids.contains(&"2"));
}

#[tokio::test]
async fn hidden_document_cannot_be_pinned_back() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    m.save_rule(
        "shop",
        Rule {
            object_id: "hide-macbook".into(),
            condition: Condition {
                pattern: "laptop".into(),
                anchoring: Anchoring::Contains,
            },
            consequence: Consequence {
                hide: vec![HiddenObject {
                    object_id: "1".into(),
                }],
                ..Default::default()
            },
        },
    )
    .unwrap();
    // A later rule promoting the same id must not resurrect it.
    m.save_rule(
        "shop",
        Rule {
            object_id: "pin-macbook".into(),
            condition: Condition {
                pattern: "laptop".into(),
                anchoring: Anchoring::Contains,
            },
            consequence: Consequence {
                promote: vec![Promotion {
                    object_id: "1".into(),
                    position: 0,
                }],
                ..Default::default()
            },
        },
    )
    .unwrap();

    let results = m.search("shop", &SearchRequest::query("laptop")).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.document.id.as_str()).collect();
    assert!(!ids.contains(&"1"));
    assert_eq!(ids[0], "2");
}

#[tokio::test]
async fn later_saved_rule_wins_contested_position() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    let pin = |rule_id: &str, doc_id: &str| Rule {
        object_id: rule_id.into(),
        condition: Condition {
            pattern: "laptop".into(),
            anchoring: Anchoring::Contains,
        },
        consequence: Consequence {
            promote: vec![Promotion {
                object_id: doc_id.into(),
                position: 0,
            }],
            ..Default::default()
        },
    };
    m.save_rule("shop", pin("r1", "1")).unwrap();
    m.save_rule("shop", pin("r2", "5")).unwrap();

    let results = m.search("shop", &SearchRequest::query("laptop")).unwrap();
    assert_eq!(results.hits[0].document.id, "5");
    assert_eq!(results.hits[1].document.id, "1");
}

#[tokio::test]
async fn rule_query_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    m.save_rule(
        "shop",
        Rule {
            object_id: "rewrite".into(),
            condition: Condition {
                pattern: "cheap laptop".into(),
                anchoring: Anchoring::Is,
            },
            consequence: Consequence {
                params: Some(ConsequenceParams {
                    query: Some("phone".into()),
                }),
                ..Default::default()
            },
        },
    )
    .unwrap();

    let results = m.search("shop", &SearchRequest::query("cheap laptop")).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.document.id.as_str()).collect();
    // The rewritten query retrieves phones, which the original terms never
    // would have.
    assert!(ids.contains(&"4"));
    assert!(!ids.contains(&"2"));
}

#[tokio::test]
async fn per_request_ranking_override() {
    let dir = tempfile::tempdir().unwrap();
    let m = catalog(&dir).await;

    // Schema says desc(popularity); the request flips to asc(price).
    let request = SearchRequest {
        custom_ranking: Some(vec!["asc(price)".to_string()]),
        ..Default::default()
    };
    let results = m.search("shop", &request).unwrap();
    let prices: Vec<f64> = results
        .hits
        .iter()
        .map(|h| h.document.fields["price"].as_number().unwrap())
        .collect();
    let mut sorted = prices.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(prices, sorted);
}

#[tokio::test]
async fn custom_ranking_breaks_textual_ties() {
    let dir = tempfile::tempdir().unwrap();
    let m = IndexManager::with_budget(
        dir.path(),
        MemoryBudget::with_limits(32 * 1024 * 1024, 8, 3 * 1024 * 1024),
    )
    .unwrap();
    m.create_tenant("t").unwrap();
    m.set_schema(
        "t",
        Schema {
            custom_ranking: vec!["desc(popularity)".to_string()],
            ..Default::default()
        },
    )
    .unwrap();

    // Identical titles: textual criteria tie, popularity must decide even
    // though objectID order says otherwise.
    let task = m
        .enqueue_write(
            "t",
            vec![
                WriteAction::Upsert(doc(json!({"objectID": "a", "title": "gizmo", "popularity": 10}))),
                WriteAction::Upsert(doc(json!({"objectID": "b", "title": "gizmo", "popularity": 50}))),
            ],
        )
        .unwrap();
    m.wait_for_task(&task.id, Duration::from_secs(5)).await.unwrap();

    let results = m.search("t", &SearchRequest::query("gizmo")).unwrap();
    assert_eq!(results.hits[0].document.id, "b");
    assert_eq!(results.hits[1].document.id, "a");
}
