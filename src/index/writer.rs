use crate::error::{QuernError, Result};
use crate::index::document::DocumentConverter;
use crate::index::memory::{MemoryBudget, WriterGuard};
use crate::schema::Schema;
use crate::types::{Document, DocumentId};
use tantivy::schema::Term;
use tantivy::IndexWriter;
use tracing::{debug, warn};

/// A tantivy writer wrapped with logical buffer accounting.
///
/// Tantivy tracks its own heap internally; what the budget limits is the
/// serialized size of this writer's uncommitted documents. When an add
/// would push past the cap, the writer commits implicitly to drain its
/// buffer and retries the add once. The budget also keeps a process-wide
/// total of buffered bytes, but that total is observational only.
pub struct BufferedWriter {
    inner: IndexWriter,
    converter: DocumentConverter,
    budget: MemoryBudget,
    _guard: WriterGuard,
    /// Bytes this writer has buffered since its last commit.
    buffered_bytes: usize,
}

impl BufferedWriter {
    pub(crate) fn new(
        inner: IndexWriter,
        converter: DocumentConverter,
        budget: MemoryBudget,
        guard: WriterGuard,
    ) -> Self {
        BufferedWriter {
            inner,
            converter,
            budget,
            _guard: guard,
            buffered_bytes: 0,
        }
    }

    /// Add or replace a document (delete-then-add keyed on `_id`).
    ///
    /// Oversized documents are rejected up front with `DocumentTooLarge`.
    /// Buffer pressure triggers one implicit commit and retry; if the
    /// document still does not fit the add fails with `WriterBufferFull`.
    pub fn add_document(&mut self, doc: &Document, schema: &Schema) -> Result<()> {
        let size = serde_json::to_string(&doc.to_json())?.len();
        self.budget.validate_doc_size(size)?;
        // A document that can never fit the buffer is a size violation,
        // not transient pressure.
        if size > self.budget.max_buffer_bytes() {
            return Err(QuernError::DocumentTooLarge {
                size,
                max: self.budget.max_buffer_bytes(),
            });
        }

        if !self.reserve(size) {
            debug!(
                buffered = self.buffered_bytes,
                incoming = size,
                "buffer pressure, committing early"
            );
            self.commit()?;
            if !self.reserve(size) {
                return Err(QuernError::WriterBufferFull {
                    buffered: self.buffered_bytes,
                    max: self.budget.max_buffer_bytes(),
                });
            }
        }

        let tdoc = self.converter.to_tantivy(doc, schema)?;
        self.delete_raw(&doc.id);
        self.inner.add_document(tdoc)?;
        Ok(())
    }

    /// Tombstone a document id. Deleting an absent id is a no-op.
    pub fn delete(&mut self, id: &DocumentId) {
        self.delete_raw(id);
    }

    /// Drop every document in the tenant.
    pub fn clear(&mut self) -> Result<()> {
        self.inner.delete_all_documents()?;
        Ok(())
    }

    /// Commit the buffered batch into a new immutable segment.
    ///
    /// On failure the buffer is rolled back so previously committed state
    /// stays intact.
    pub fn commit(&mut self) -> Result<u64> {
        match self.inner.commit() {
            Ok(opstamp) => {
                self.release();
                Ok(opstamp)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolling back buffered batch");
                self.release();
                if let Err(rb) = self.inner.rollback() {
                    warn!(error = %rb, "rollback after failed commit also failed");
                }
                Err(QuernError::CommitFailed(e.to_string()))
            }
        }
    }

    /// Discard the buffered batch.
    pub fn rollback(&mut self) -> Result<()> {
        self.release();
        self.inner.rollback()?;
        Ok(())
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    fn delete_raw(&mut self, id: &str) {
        let term = Term::from_field_text(self.converter.id_field(), id);
        self.inner.delete_term(term);
    }

    /// Try to account `size` bytes against this writer's buffer cap.
    ///
    /// The cap is per writer; the aggregate counter only tracks the
    /// process-wide total for observability and never blocks admission.
    fn reserve(&mut self, size: usize) -> bool {
        if self.buffered_bytes + size > self.budget.max_buffer_bytes() {
            return false;
        }
        self.budget.add_buffered(size);
        self.buffered_bytes += size;
        true
    }

    fn release(&mut self) {
        self.budget.release_buffered(self.buffered_bytes);
        self.buffered_bytes = 0;
    }
}

impl Drop for BufferedWriter {
    fn drop(&mut self) {
        // Uncommitted bytes must not leak into the aggregate counter.
        self.release();
    }
}
