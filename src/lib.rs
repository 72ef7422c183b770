//! Quern is an embedded, multi-tenant full-text search engine built on
//! tantivy, following Algolia's API conventions: `objectID`-keyed JSON
//! documents, filter strings, facet counts, synonyms, and query rules.
//!
//! Each tenant owns a segmented index under one directory. Writers and
//! readers are split: mutations flow through a per-tenant serial write
//! queue and become visible only when their segment commits and the reader
//! reloads, so queries always see a consistent committed view. Admission
//! control bounds concurrent writers and buffered bytes process-wide.
//!
//! ```no_run
//! use quern::{IndexManager, SearchRequest, WriteAction, Document};
//! use serde_json::json;
//!
//! # async fn demo() -> quern::Result<()> {
//! let manager = IndexManager::new("/var/lib/quern")?;
//! manager.create_tenant("products")?;
//!
//! let doc = Document::from_json(&json!({
//!     "objectID": "1", "title": "MacBook Pro", "price": 2399,
//! }))?;
//! let task = manager.enqueue_write("products", vec![WriteAction::Upsert(doc)])?;
//! manager
//!     .wait_for_task(&task.id, std::time::Duration::from_secs(5))
//!     .await?;
//!
//! let results = manager.search("products", &SearchRequest::query("macbook"))?;
//! assert_eq!(results.nb_hits, 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod query;
pub mod replication;
pub mod schema;
pub mod types;

pub use error::{QuernError, Result};
pub use index::manager::IndexManager;
pub use index::memory::{BudgetConfig, MemoryBudget};
pub use index::rules::{Anchoring, Condition, Consequence, Rule};
pub use index::synonyms::Synonym;
pub use query::executor::SearchRequest;
pub use query::filter::FilterExpr;
pub use replication::{NodeStatus, PeerInfo, ReplicationState};
pub use schema::Schema;
pub use types::{
    Document, DocumentId, FacetCount, FieldValue, HealthStatus, Hit, SearchResult, TaskInfo,
    TaskStatus, TenantId, WriteAction,
};

/// Install the default `tracing` subscriber, honoring `RUST_LOG`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    static INIT: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
