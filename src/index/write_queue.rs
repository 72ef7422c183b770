use crate::index::memory::MemoryBudget;
use crate::index::writer::BufferedWriter;
use crate::index::Index;
use crate::query::executor::facets::FacetCache;
use crate::schema::Schema;
use crate::types::{DocFailure, TaskInfo, TaskStatus, TenantId, WriteAction};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Queued batches per tenant before enqueue fails with `QueueFull`.
pub(crate) const QUEUE_CAPACITY: usize = 1000;

const ACQUIRE_ATTEMPTS: u32 = 50;
const ACQUIRE_BACKOFF: Duration = Duration::from_millis(100);

/// One batch of mutations bound to a task id.
#[derive(Debug)]
pub(crate) struct WriteBatch {
    pub task_id: String,
    pub actions: Vec<WriteAction>,
}

/// Spawn the serial write worker for one tenant.
///
/// The worker owns the only mutation path into the tenant's index: batches
/// are applied in arrival order, each ending in a commit, a reader reload,
/// and a facet cache invalidation before the task goes terminal. Dropping
/// the sender drains the queue and stops the worker, which is how exports
/// wait out in-flight writes.
pub(crate) fn spawn_worker(
    tenant: TenantId,
    index: Arc<Index>,
    budget: MemoryBudget,
    schemas: Arc<DashMap<TenantId, Schema>>,
    tasks: Arc<DashMap<String, TaskInfo>>,
    cache: Arc<FacetCache>,
) -> (mpsc::Sender<WriteBatch>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<WriteBatch>(QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        info!(tenant, "write worker started");
        while let Some(batch) = receiver.recv().await {
            process_batch(&tenant, &index, &budget, &schemas, &tasks, &cache, batch).await;
        }
        info!(tenant, "write worker stopped");
    });
    (sender, handle)
}

async fn process_batch(
    tenant: &str,
    index: &Index,
    budget: &MemoryBudget,
    schemas: &DashMap<TenantId, Schema>,
    tasks: &DashMap<String, TaskInfo>,
    cache: &FacetCache,
    batch: WriteBatch,
) {
    let mut writer = match acquire_writer(tenant, index, budget).await {
        Ok(writer) => writer,
        Err(message) => {
            fail_task(tasks, &batch.task_id, message);
            return;
        }
    };

    let schema = schemas
        .get(tenant)
        .map(|s| s.clone())
        .unwrap_or_default();

    let mut indexed = 0usize;
    let mut deleted = 0usize;
    let mut failures: Vec<DocFailure> = Vec::new();
    for action in batch.actions {
        match action {
            WriteAction::Upsert(doc) => match writer.add_document(&doc, &schema) {
                Ok(()) => indexed += 1,
                Err(e) => {
                    warn!(tenant, doc_id = %doc.id, error = %e, "document rejected");
                    failures.push(DocFailure {
                        doc_id: doc.id,
                        error: e.to_string(),
                    });
                }
            },
            WriteAction::Delete(id) => {
                writer.delete(&id);
                deleted += 1;
            }
            WriteAction::Clear => {
                if let Err(e) = writer.clear() {
                    fail_task(tasks, &batch.task_id, e.to_string());
                    return;
                }
            }
        }
    }

    // Commit failure leaves the previously committed view intact; the task
    // carries the error instead of surfacing it to the enqueuer.
    if let Err(e) = writer.commit() {
        error!(tenant, task = %batch.task_id, error = %e, "batch commit failed");
        fail_task(tasks, &batch.task_id, e.to_string());
        return;
    }
    drop(writer);

    if let Err(e) = index.reload() {
        error!(tenant, task = %batch.task_id, error = %e, "reader reload failed");
        fail_task(tasks, &batch.task_id, e.to_string());
        return;
    }
    cache.invalidate_tenant(tenant);

    if let Some(mut task) = tasks.get_mut(&batch.task_id) {
        task.status = TaskStatus::Published;
        task.indexed_documents = indexed;
        task.deleted_documents = deleted;
        task.rejected_count = failures.len();
        task.rejected_documents = failures;
    }
}

/// Writer admission with backoff; only retryable failures are retried.
async fn acquire_writer(
    tenant: &str,
    index: &Index,
    budget: &MemoryBudget,
) -> std::result::Result<BufferedWriter, String> {
    let mut last = String::new();
    for attempt in 0..ACQUIRE_ATTEMPTS {
        match index.writer(budget) {
            Ok(writer) => return Ok(writer),
            Err(e) if e.is_retryable() => {
                if attempt == 0 {
                    warn!(tenant, error = %e, "writer admission deferred");
                }
                last = e.to_string();
                tokio::time::sleep(ACQUIRE_BACKOFF).await;
            }
            Err(e) => return Err(e.to_string()),
        }
    }
    Err(last)
}

fn fail_task(tasks: &DashMap<String, TaskInfo>, task_id: &str, message: String) {
    if let Some(mut task) = tasks.get_mut(task_id) {
        task.status = TaskStatus::Error(message);
    }
}
