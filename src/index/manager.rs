use crate::error::{QuernError, Result};
use crate::index::memory::MemoryBudget;
use crate::index::rules::{Rule, RuleSet};
use crate::index::snapshot;
use crate::index::synonyms::{Synonym, SynonymSet};
use crate::index::write_queue::{self, WriteBatch, QUEUE_CAPACITY};
use crate::index::Index;
use crate::query::executor::facets::FacetCache;
use crate::query::executor::{self, SearchRequest};
use crate::replication::{NodeStatus, ReplicationState};
use crate::schema::Schema;
use crate::types::{
    Document, DocumentId, HealthStatus, SearchResult, TaskInfo, TenantId, WriteAction,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Terminal tasks kept for status queries before eviction.
const TASK_RETENTION: usize = 1000;
/// Facet cache capacity, shared across tenants.
const FACET_CACHE_CAP: usize = 500;

const SCHEMA_FILE: &str = "schema.json";
const SYNONYMS_FILE: &str = "synonyms.json";
const RULES_FILE: &str = "rules.json";

/// The engine entry point: tenant lifecycle, writes, queries, settings,
/// snapshots, and operational status.
///
/// One manager owns every tenant under `base_path`. Mutations flow through
/// per-tenant serial write queues; queries run synchronously against the
/// committed reader view.
pub struct IndexManager {
    base_path: PathBuf,
    budget: MemoryBudget,
    indexes: DashMap<TenantId, Arc<Index>>,
    schemas: Arc<DashMap<TenantId, Schema>>,
    synonyms: DashMap<TenantId, Arc<RwLock<SynonymSet>>>,
    rules: DashMap<TenantId, Arc<RwLock<RuleSet>>>,
    queues: DashMap<TenantId, mpsc::Sender<WriteBatch>>,
    workers: DashMap<TenantId, JoinHandle<()>>,
    tasks: Arc<DashMap<String, TaskInfo>>,
    task_order: Mutex<VecDeque<String>>,
    cache: Arc<FacetCache>,
    replication: ReplicationState,
    #[cfg(feature = "s3-snapshots")]
    snapshot_store: Option<crate::index::s3::SnapshotStore>,
}

impl IndexManager {
    /// Open the engine rooted at `base_path`, creating the directory when
    /// missing. Budget limits and replication identity come from the
    /// environment.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Arc<Self>> {
        Self::with_budget(base_path, crate::index::memory::global().clone())
    }

    /// Like [`IndexManager::new`] with an explicit budget, for embedders
    /// that size limits themselves.
    pub fn with_budget<P: AsRef<Path>>(base_path: P, budget: MemoryBudget) -> Result<Arc<Self>> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        info!(path = %base_path.display(), "index manager starting");
        #[cfg(feature = "s3-snapshots")]
        let snapshot_store = match crate::index::s3::S3Config::from_env() {
            Some(config) => Some(crate::index::s3::SnapshotStore::new(&config)?),
            None => None,
        };
        Ok(Arc::new(IndexManager {
            base_path,
            budget,
            indexes: DashMap::new(),
            schemas: Arc::new(DashMap::new()),
            synonyms: DashMap::new(),
            rules: DashMap::new(),
            queues: DashMap::new(),
            workers: DashMap::new(),
            tasks: Arc::new(DashMap::new()),
            task_order: Mutex::new(VecDeque::new()),
            cache: Arc::new(FacetCache::new(FACET_CACHE_CAP)),
            replication: ReplicationState::from_env(),
            #[cfg(feature = "s3-snapshots")]
            snapshot_store,
        }))
    }

    fn tenant_dir(&self, tenant: &str) -> PathBuf {
        self.base_path.join(tenant)
    }

    fn validate_tenant_id(tenant: &str) -> Result<()> {
        let valid = !tenant.is_empty()
            && tenant
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(QuernError::InvalidQuery(format!(
                "invalid tenant id: {tenant:?}"
            )))
        }
    }

    // ---- tenant lifecycle ----

    /// Create a new empty tenant. Fails if the tenant already exists.
    pub fn create_tenant(&self, tenant: &str) -> Result<()> {
        Self::validate_tenant_id(tenant)?;
        let dir = self.tenant_dir(tenant);
        if dir.exists() {
            return Err(QuernError::TenantAlreadyExists(tenant.to_string()));
        }
        let index = Index::open_or_create(tenant, &dir)?;
        self.indexes.insert(tenant.to_string(), Arc::new(index));
        info!(tenant, "tenant created");
        Ok(())
    }

    /// Delete a tenant and everything it owns: queued writes are drained
    /// first, then the directory is removed.
    pub async fn delete_tenant(&self, tenant: &str) -> Result<()> {
        Self::validate_tenant_id(tenant)?;
        let dir = self.tenant_dir(tenant);
        if !dir.exists() {
            return Err(QuernError::TenantNotFound(tenant.to_string()));
        }
        self.quiesce(tenant).await;
        self.indexes.remove(tenant);
        self.schemas.remove(tenant);
        self.synonyms.remove(tenant);
        self.rules.remove(tenant);
        self.cache.invalidate_tenant(tenant);
        std::fs::remove_dir_all(&dir)?;
        info!(tenant, "tenant deleted");
        Ok(())
    }

    /// Names of every tenant on disk, sorted.
    pub fn list_tenants(&self) -> Result<Vec<TenantId>> {
        let mut tenants = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(name.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    /// The tenant's index, loading it from disk on first access.
    fn get_or_load(&self, tenant: &str) -> Result<Arc<Index>> {
        Self::validate_tenant_id(tenant)?;
        if let Some(index) = self.indexes.get(tenant) {
            return Ok(Arc::clone(&index));
        }
        let dir = self.tenant_dir(tenant);
        if !dir.exists() {
            return Err(QuernError::TenantNotFound(tenant.to_string()));
        }
        let index = Arc::new(Index::open_or_create(tenant, &dir)?);
        self.indexes
            .insert(tenant.to_string(), Arc::clone(&index));
        Ok(index)
    }

    // ---- writes ----

    /// Enqueue a write batch on the tenant's serial queue.
    ///
    /// Returns the pending task immediately; admission and per-document
    /// failures surface through the task status. A full queue fails
    /// synchronously with `QueueFull`.
    pub fn enqueue_write(&self, tenant: &str, actions: Vec<WriteAction>) -> Result<TaskInfo> {
        let index = self.get_or_load(tenant)?;
        let task_id = format!("task_{tenant}_{}", Uuid::new_v4());
        let task = TaskInfo::new(task_id.clone(), actions.len());
        self.tasks.insert(task_id.clone(), task.clone());
        self.record_task(&task_id);

        let sender = self.queue_for(tenant, index);
        let batch = WriteBatch {
            task_id: task_id.clone(),
            actions,
        };
        if let Err(e) = sender.try_send(batch) {
            self.tasks.remove(&task_id);
            warn!(tenant, error = %e, "write queue full");
            return Err(QuernError::QueueFull(tenant.to_string()));
        }
        Ok(task)
    }

    fn queue_for(&self, tenant: &str, index: Arc<Index>) -> mpsc::Sender<WriteBatch> {
        use dashmap::mapref::entry::Entry;
        let spawn = || {
            write_queue::spawn_worker(
                tenant.to_string(),
                index,
                self.budget.clone(),
                Arc::clone(&self.schemas),
                Arc::clone(&self.tasks),
                Arc::clone(&self.cache),
            )
        };
        // The entry lock makes worker spawn atomic per tenant.
        match self.queues.entry(tenant.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_closed() => {
                let (sender, handle) = spawn();
                occupied.insert(sender.clone());
                self.workers.insert(tenant.to_string(), handle);
                sender
            }
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let (sender, handle) = spawn();
                vacant.insert(sender.clone());
                self.workers.insert(tenant.to_string(), handle);
                sender
            }
        }
    }

    /// Stop the tenant's write worker after it drains every queued batch.
    async fn quiesce(&self, tenant: &str) {
        if let Some((_, sender)) = self.queues.remove(tenant) {
            drop(sender);
        }
        if let Some((_, handle)) = self.workers.remove(tenant) {
            if let Err(e) = handle.await {
                warn!(tenant, error = %e, "write worker ended abnormally");
            }
        }
    }

    fn record_task(&self, task_id: &str) {
        let Ok(mut order) = self.task_order.lock() else {
            return;
        };
        order.push_back(task_id.to_string());
        while order.len() > TASK_RETENTION {
            if let Some(evicted) = order.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    /// Status of one write task.
    pub fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        self.tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| QuernError::TaskNotFound(task_id.to_string()))
    }

    /// Poll a task until it leaves `Pending` or the timeout expires.
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<TaskInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(task_id)?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(task);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // ---- reads ----

    /// Point lookup by objectID against the committed view.
    pub fn get_document(&self, tenant: &str, id: &DocumentId) -> Result<Option<Document>> {
        self.get_or_load(tenant)?.get_document(id)
    }

    /// Run a search against one tenant.
    pub fn search(&self, tenant: &str, request: &SearchRequest) -> Result<SearchResult> {
        let index = self.get_or_load(tenant)?;
        let schema = self.schema(tenant)?;
        let synonyms = self.synonyms_for(tenant)?;
        let rules = self.rules_for(tenant)?;
        let synonyms = synonyms.read().map_err(poisoned)?;
        let rules = rules.read().map_err(poisoned)?;
        executor::execute(&index, &schema, &synonyms, &rules, &self.cache, request)
    }

    // ---- schema ----

    /// The tenant's schema; defaults apply when none was ever saved.
    pub fn schema(&self, tenant: &str) -> Result<Schema> {
        if let Some(schema) = self.schemas.get(tenant) {
            return Ok(schema.clone());
        }
        self.get_or_load(tenant)?;
        let path = self.tenant_dir(tenant).join(SCHEMA_FILE);
        let schema = if path.exists() {
            Schema::load(&path)?
        } else {
            Schema::default()
        };
        self.schemas.insert(tenant.to_string(), schema.clone());
        Ok(schema)
    }

    /// Replace the tenant's schema. Takes effect on segments committed
    /// afterwards and on query-time interpretation immediately.
    pub fn set_schema(&self, tenant: &str, schema: Schema) -> Result<()> {
        self.get_or_load(tenant)?;
        schema.save(self.tenant_dir(tenant).join(SCHEMA_FILE))?;
        self.schemas.insert(tenant.to_string(), schema);
        self.cache.invalidate_tenant(tenant);
        Ok(())
    }

    // ---- synonyms ----

    fn synonyms_for(&self, tenant: &str) -> Result<Arc<RwLock<SynonymSet>>> {
        if let Some(set) = self.synonyms.get(tenant) {
            return Ok(Arc::clone(&set));
        }
        self.get_or_load(tenant)?;
        let set = SynonymSet::load(self.tenant_dir(tenant).join(SYNONYMS_FILE))?;
        let set = Arc::new(RwLock::new(set));
        self.synonyms.insert(tenant.to_string(), Arc::clone(&set));
        Ok(set)
    }

    pub fn save_synonym(&self, tenant: &str, synonym: Synonym) -> Result<()> {
        let set = self.synonyms_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        set.upsert(synonym);
        set.save(self.tenant_dir(tenant).join(SYNONYMS_FILE))?;
        self.cache.invalidate_tenant(tenant);
        Ok(())
    }

    pub fn get_synonym(&self, tenant: &str, object_id: &str) -> Result<Option<Synonym>> {
        let set = self.synonyms_for(tenant)?;
        let set = set.read().map_err(poisoned)?;
        Ok(set.get(object_id).cloned())
    }

    pub fn delete_synonym(&self, tenant: &str, object_id: &str) -> Result<bool> {
        let set = self.synonyms_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        let removed = set.delete(object_id);
        if removed {
            set.save(self.tenant_dir(tenant).join(SYNONYMS_FILE))?;
            self.cache.invalidate_tenant(tenant);
        }
        Ok(removed)
    }

    pub fn clear_synonyms(&self, tenant: &str) -> Result<()> {
        let set = self.synonyms_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        set.clear();
        set.save(self.tenant_dir(tenant).join(SYNONYMS_FILE))?;
        self.cache.invalidate_tenant(tenant);
        Ok(())
    }

    pub fn search_synonyms(
        &self,
        tenant: &str,
        query: &str,
        page: usize,
        hits_per_page: usize,
    ) -> Result<(Vec<Synonym>, usize)> {
        let set = self.synonyms_for(tenant)?;
        let set = set.read().map_err(poisoned)?;
        Ok(set.search(query, page, hits_per_page))
    }

    // ---- rules ----

    fn rules_for(&self, tenant: &str) -> Result<Arc<RwLock<RuleSet>>> {
        if let Some(set) = self.rules.get(tenant) {
            return Ok(Arc::clone(&set));
        }
        self.get_or_load(tenant)?;
        let set = RuleSet::load(self.tenant_dir(tenant).join(RULES_FILE))?;
        let set = Arc::new(RwLock::new(set));
        self.rules.insert(tenant.to_string(), Arc::clone(&set));
        Ok(set)
    }

    pub fn save_rule(&self, tenant: &str, rule: Rule) -> Result<()> {
        let set = self.rules_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        set.upsert(rule);
        set.save(self.tenant_dir(tenant).join(RULES_FILE))?;
        Ok(())
    }

    pub fn get_rule(&self, tenant: &str, object_id: &str) -> Result<Option<Rule>> {
        let set = self.rules_for(tenant)?;
        let set = set.read().map_err(poisoned)?;
        Ok(set.get(object_id).cloned())
    }

    pub fn delete_rule(&self, tenant: &str, object_id: &str) -> Result<bool> {
        let set = self.rules_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        let removed = set.delete(object_id);
        if removed {
            set.save(self.tenant_dir(tenant).join(RULES_FILE))?;
        }
        Ok(removed)
    }

    pub fn clear_rules(&self, tenant: &str) -> Result<()> {
        let set = self.rules_for(tenant)?;
        let mut set = set.write().map_err(poisoned)?;
        set.clear();
        set.save(self.tenant_dir(tenant).join(RULES_FILE))?;
        Ok(())
    }

    pub fn search_rules(
        &self,
        tenant: &str,
        query: &str,
        page: usize,
        hits_per_page: usize,
    ) -> Result<(Vec<Rule>, usize)> {
        let set = self.rules_for(tenant)?;
        let set = set.read().map_err(poisoned)?;
        Ok(set.search(query, page, hits_per_page))
    }

    // ---- snapshots ----

    /// Export the tenant as a gzipped tarball.
    ///
    /// The write queue is drained and stopped first so the archive holds a
    /// committed view; a new worker spawns on the next write.
    pub async fn export_tenant(&self, tenant: &str) -> Result<Vec<u8>> {
        let dir = self.tenant_dir(tenant);
        if !dir.exists() {
            return Err(QuernError::TenantNotFound(tenant.to_string()));
        }
        self.quiesce(tenant).await;
        snapshot::export_to_bytes(&dir)
    }

    /// Import a snapshot as `tenant`, failing with `ImportConflict` when
    /// the tenant exists and `overwrite` is not set.
    pub async fn import_tenant(&self, tenant: &str, data: &[u8], overwrite: bool) -> Result<()> {
        Self::validate_tenant_id(tenant)?;
        self.quiesce(tenant).await;
        self.indexes.remove(tenant);
        self.schemas.remove(tenant);
        self.synonyms.remove(tenant);
        self.rules.remove(tenant);
        snapshot::import_from_bytes(&self.tenant_dir(tenant), data, overwrite)?;
        self.cache.invalidate_tenant(tenant);
        self.get_or_load(tenant)?;
        Ok(())
    }

    /// Upload a snapshot of the tenant to the configured object store.
    #[cfg(feature = "s3-snapshots")]
    pub async fn backup_tenant(&self, tenant: &str) -> Result<String> {
        let store = self
            .snapshot_store
            .as_ref()
            .ok_or(QuernError::SnapshotUnavailable)?;
        let data = self.export_tenant(tenant).await?;
        store.upload(tenant, &data).await
    }

    /// Restore a tenant from its most recent remote snapshot.
    #[cfg(feature = "s3-snapshots")]
    pub async fn restore_tenant(&self, tenant: &str, overwrite: bool) -> Result<()> {
        let store = self
            .snapshot_store
            .as_ref()
            .ok_or(QuernError::SnapshotUnavailable)?;
        let key = store
            .latest(tenant)
            .await?
            .ok_or_else(|| QuernError::TenantNotFound(tenant.to_string()))?;
        let data = store.download(&key).await?;
        self.import_tenant(tenant, &data, overwrite).await
    }

    /// Remote snapshot keys for a tenant, oldest first.
    #[cfg(feature = "s3-snapshots")]
    pub async fn list_backups(&self, tenant: &str) -> Result<Vec<String>> {
        let store = self
            .snapshot_store
            .as_ref()
            .ok_or(QuernError::SnapshotUnavailable)?;
        store.list(tenant).await
    }

    /// Delete remote snapshots beyond the `keep` most recent. Returns how
    /// many were removed.
    #[cfg(feature = "s3-snapshots")]
    pub async fn prune_backups(&self, tenant: &str, keep: usize) -> Result<usize> {
        let store = self
            .snapshot_store
            .as_ref()
            .ok_or(QuernError::SnapshotUnavailable)?;
        store.enforce_retention(tenant, keep).await
    }

    // ---- status ----

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            active_writers: self.budget.active_writers(),
            max_concurrent_writers: self.budget.max_concurrent_writers(),
            facet_cache_entries: self.cache.entries(),
            facet_cache_cap: self.cache.cap(),
        }
    }

    pub fn node_status(&self) -> NodeStatus {
        self.replication.status()
    }

    pub fn replication(&self) -> &ReplicationState {
        &self.replication
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    /// Headroom left on the tenant's write queue, for backpressure-aware
    /// callers.
    pub fn queue_capacity(&self, tenant: &str) -> usize {
        self.queues
            .get(tenant)
            .map(|s| s.capacity())
            .unwrap_or(QUEUE_CAPACITY)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> QuernError {
    QuernError::Index("settings lock poisoned".to_string())
}
