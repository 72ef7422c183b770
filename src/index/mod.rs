pub mod document;
pub mod manager;
pub mod memory;
pub mod rules;
#[cfg(feature = "s3-snapshots")]
pub mod s3;
pub mod snapshot;
pub mod synonyms;
pub mod write_queue;
pub mod writer;

use crate::error::Result;
use crate::types::{Document, DocumentId, TenantId};
use document::DocumentConverter;
use memory::MemoryBudget;
use std::path::{Path, PathBuf};
use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, SchemaBuilder, Term, STORED, STRING, TEXT};
use tantivy::{IndexReader, ReloadPolicy, TantivyDocument};
use tracing::info;
use writer::BufferedWriter;

const WRITER_HEAP_BYTES: usize = 50 * 1024 * 1024;

/// One tenant's segmented index on disk.
///
/// Readers serve from committed segments only; a [`BufferedWriter`] obtained
/// through [`Index::writer`] buffers mutations until commit, after which
/// [`Index::reload`] makes the new segment visible.
pub struct Index {
    tenant: TenantId,
    path: PathBuf,
    inner: tantivy::Index,
    reader: IndexReader,
    converter: DocumentConverter,
}

fn tantivy_schema() -> tantivy::schema::Schema {
    let mut builder = SchemaBuilder::default();
    builder.add_text_field("_id", STRING | STORED);
    builder.add_text_field("_all", TEXT);
    builder.add_text_field("_source", STORED);
    builder.build()
}

impl Index {
    /// Open the index at `path`, creating it when no `meta.json` exists yet.
    pub fn open_or_create(tenant: &str, path: &Path) -> Result<Self> {
        let inner = if path.join("meta.json").exists() {
            tantivy::Index::open_in_dir(path)?
        } else {
            std::fs::create_dir_all(path)?;
            info!(tenant, path = %path.display(), "creating index");
            tantivy::Index::create_in_dir(path, tantivy_schema())?
        };
        let reader = inner
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let converter = DocumentConverter::new(&inner.schema())?;
        Ok(Index {
            tenant: tenant.to_string(),
            path: path.to_path_buf(),
            inner,
            reader,
            converter,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a budgeted writer for this tenant.
    ///
    /// Fails synchronously with `ResourceExhausted` when the process-wide
    /// writer cap is reached.
    pub fn writer(&self, budget: &MemoryBudget) -> Result<BufferedWriter> {
        let guard = budget.acquire_writer()?;
        let inner = self.inner.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let converter = DocumentConverter::new(&self.inner.schema())?;
        Ok(BufferedWriter::new(inner, converter, budget.clone(), guard))
    }

    pub fn searcher(&self) -> tantivy::Searcher {
        self.reader.searcher()
    }

    pub fn converter(&self) -> &DocumentConverter {
        &self.converter
    }

    /// Pick up segments committed since the last reload.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    /// Commit the writer's batch and make it visible in one step. Returns
    /// the committed generation.
    pub fn commit_and_reload(&self, writer: &mut BufferedWriter) -> Result<u64> {
        let generation = writer.commit()?;
        self.reload()?;
        Ok(generation)
    }

    /// Point lookup by document id against the committed view.
    pub fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        let searcher = self.searcher();
        let term = Term::from_field_text(self.converter.id_field(), id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let docs = searcher.search(&query, &DocSetCollector)?;
        match docs.into_iter().next() {
            Some(addr) => {
                let tdoc: TantivyDocument = searcher.doc(addr)?;
                Ok(Some(self.converter.from_tantivy(&tdoc)?))
            }
            None => Ok(None),
        }
    }

    /// Committed document count across all segments.
    pub fn num_docs(&self) -> u64 {
        self.searcher().num_docs()
    }
}
