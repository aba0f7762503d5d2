//! The reactor facade: what API layers talk to.
//!
//! Writes go through the queue to the executor pool; reads come from the
//! caches and the operation store. Every entry point accepts an optional
//! cancellation token that releases the caller without cancelling work
//! already in flight.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::constants::ACTION_CREATE_DOCUMENT;
use crate::constants::ACTION_DELETE_DOCUMENT;
use crate::constants::DOCUMENT_SCOPE;
use crate::constants::EMPTY_LOG_REVISION;
use crate::constants::MAIN_BRANCH;
use crate::Action;
use crate::ConsistencyTracker;
use crate::DocumentMetaCache;
use crate::DocumentModelRegistry;
use crate::DocumentRevisions;
use crate::Error;
use crate::EventBus;
use crate::InMemoryJobQueue;
use crate::Job;
use crate::JobAwaiter;
use crate::JobExecutorManager;
use crate::JobInfo;
use crate::JobPlanEntry;
use crate::JobTracker;
use crate::ManagerStatus;
use crate::Operation;
use crate::OperationSink;
use crate::OperationStore;
use crate::OperationWithContext;
use crate::QueueError;
use crate::Result;
use crate::Settings;
use crate::ShutdownStatus;
use crate::StateCache;
use crate::SyncAwaiter;
use crate::SyncManager;
use crate::SyncStatus;
use crate::SyncStatusTracker;
use crate::SyncWaitOutcome;

/// Which branch and scopes a read wants.
#[derive(Debug, Clone)]
pub struct ViewFilter {
    pub branch: String,
    /// Empty means every scope the document has
    pub scopes: Vec<String>,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            branch: MAIN_BRANCH.to_string(),
            scopes: Vec::new(),
        }
    }
}

/// A materialized read of one document.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document_id: String,
    pub document_type: String,
    pub is_deleted: bool,
    pub revisions: DocumentRevisions,
    /// Reduced state per scope
    pub state: HashMap<String, serde_json::Value>,
    /// Child document ids from the relationship log
    pub children: Vec<String>,
}

pub struct Reactor {
    pub(crate) settings: Settings,
    pub(crate) store: Arc<dyn OperationStore>,
    pub(crate) registry: Arc<DocumentModelRegistry>,
    pub(crate) meta_cache: Arc<DocumentMetaCache>,
    pub(crate) state_cache: Arc<StateCache>,
    pub(crate) queue: Arc<InMemoryJobQueue>,
    pub(crate) manager: Arc<JobExecutorManager>,
    pub(crate) tracker: Arc<JobTracker>,
    pub(crate) job_awaiter: Arc<JobAwaiter>,
    pub(crate) sync_awaiter: Arc<SyncAwaiter>,
    pub(crate) status_tracker: Arc<SyncStatusTracker>,
    pub(crate) consistency: Arc<ConsistencyTracker>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) sync_manager: OnceLock<Arc<SyncManager>>,
    pub(crate) is_shutdown: AtomicBool,
}

impl Reactor {
    fn check_alive(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(Error::Cancelled);
        }
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Fatal("reactor is shut down".to_string()));
        }
        Ok(())
    }

    fn submit(
        &self,
        job: Job,
    ) -> Result<JobInfo> {
        let info = self.tracker.insert_queued(&job.id);
        self.queue.enqueue(job)?;
        Ok(info)
    }

    /// Enqueues document creation. The returned JobInfo is Queued; await
    /// it to learn the outcome.
    pub fn create(
        &self,
        document_id: Option<&str>,
        document_type: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.create_with_slug(document_id, document_type, None, cancel)
    }

    /// Like `create`, also recording a slug for `get_by_slug` lookups.
    pub fn create_with_slug(
        &self,
        document_id: Option<&str>,
        document_type: &str,
        slug: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.check_alive(cancel)?;
        let document_id = document_id
            .map(str::to_string)
            .unwrap_or_else(|| nanoid::nanoid!());
        let mut input = serde_json::json!({ "model": document_type });
        if let Some(slug) = slug {
            input["slug"] = serde_json::Value::String(slug.to_string());
        }
        let action = Action::new(ACTION_CREATE_DOCUMENT, input, DOCUMENT_SCOPE);
        self.submit(
            Job::mutate(document_id, DOCUMENT_SCOPE, MAIN_BRANCH, vec![action])
                .with_max_retries(self.settings.executor.max_retries),
        )
    }

    /// Enqueues actions against one (document, scope, branch) log.
    pub fn mutate(
        &self,
        document_id: &str,
        scope: &str,
        branch: Option<&str>,
        actions: Vec<Action>,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.check_alive(cancel)?;
        self.submit(
            Job::mutate(
                document_id,
                scope,
                branch.unwrap_or(MAIN_BRANCH),
                actions,
            )
            .with_max_retries(self.settings.executor.max_retries),
        )
    }

    /// Validates and enqueues a dependency-ordered batch as one unit.
    pub fn mutate_batch(
        &self,
        entries: Vec<JobPlanEntry>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<JobInfo>> {
        self.check_alive(cancel)?;
        crate::validate_plan(&entries)?;
        for entry in &entries {
            self.tracker.insert_queued(&entry.job.id);
        }
        let ids = self.queue.enqueue_plan(entries)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.tracker.get(id))
            .collect())
    }

    pub fn delete_document(
        &self,
        document_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.check_alive(cancel)?;
        let action = Action::new(
            ACTION_DELETE_DOCUMENT,
            serde_json::json!({}),
            DOCUMENT_SCOPE,
        );
        self.submit(
            Job::mutate(document_id, DOCUMENT_SCOPE, MAIN_BRANCH, vec![action])
                .with_max_retries(self.settings.executor.max_retries),
        )
    }

    /// Current view of a document: meta fold, per-scope revisions and the
    /// reduced state of the requested scopes.
    pub async fn get(
        &self,
        document_id: &str,
        view: Option<ViewFilter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentView> {
        self.check_alive(cancel)?;
        let view = view.unwrap_or_default();

        let meta = self
            .meta_cache
            .get_document_meta(document_id, &view.branch, cancel)
            .await?;
        let revisions = self.store.get_revisions(document_id, &view.branch).await?;

        let scopes: Vec<String> = if view.scopes.is_empty() {
            revisions
                .revision
                .keys()
                .filter(|s| s.as_str() != DOCUMENT_SCOPE)
                .cloned()
                .collect()
        } else {
            view.scopes.clone()
        };

        let mut state = HashMap::new();
        for scope in scopes {
            state.insert(
                scope.clone(),
                self.scope_state(document_id, &scope, &view.branch, &meta.document_type)
                    .await?,
            );
        }

        Ok(DocumentView {
            document_id: document_id.to_string(),
            document_type: meta.document_type,
            is_deleted: meta.state.is_deleted,
            revisions,
            state,
            children: meta.state.children,
        })
    }

    /// Resolves a slug recorded at creation time to its document, then
    /// reads it like `get`. The scan walks the global ordinal index; a
    /// dedicated slug read model would replace it at scale.
    pub async fn get_by_slug(
        &self,
        slug: &str,
        view: Option<ViewFilter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentView> {
        self.check_alive(cancel)?;

        let mut document_id: Option<String> = None;
        for entry in self.store.get_since_ordinal(0).await? {
            if entry.operation.action.action_type == ACTION_CREATE_DOCUMENT
                && entry.operation.action.input["slug"].as_str() == Some(slug)
            {
                document_id = Some(entry.context.document_id);
            }
        }

        let document_id = document_id.ok_or_else(|| {
            crate::StorageError::DocumentNotFound {
                document_id: format!("slug:{slug}"),
                scope: DOCUMENT_SCOPE.to_string(),
                branch: view
                    .as_ref()
                    .map(|v| v.branch.clone())
                    .unwrap_or_else(|| MAIN_BRANCH.to_string()),
            }
        })?;
        self.get(&document_id, view, cancel).await
    }

    /// Records parent-child relationships as document-scope operations.
    pub fn add_children(
        &self,
        document_id: &str,
        child_ids: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.check_alive(cancel)?;
        let actions = child_ids
            .iter()
            .map(|child| {
                Action::new(
                    crate::constants::ACTION_ADD_RELATIONSHIP,
                    serde_json::json!({ "documentId": child }),
                    DOCUMENT_SCOPE,
                )
            })
            .collect();
        self.submit(
            Job::mutate(document_id, DOCUMENT_SCOPE, MAIN_BRANCH, actions)
                .with_max_retries(self.settings.executor.max_retries),
        )
    }

    pub fn remove_children(
        &self,
        document_id: &str,
        child_ids: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        self.check_alive(cancel)?;
        let actions = child_ids
            .iter()
            .map(|child| {
                Action::new(
                    crate::constants::ACTION_REMOVE_RELATIONSHIP,
                    serde_json::json!({ "documentId": child }),
                    DOCUMENT_SCOPE,
                )
            })
            .collect();
        self.submit(
            Job::mutate(document_id, DOCUMENT_SCOPE, MAIN_BRANCH, actions)
                .with_max_retries(self.settings.executor.max_retries),
        )
    }

    async fn scope_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        document_type: &str,
    ) -> Result<serde_json::Value> {
        if let Some(cached) = self.state_cache.get_state(document_id, scope, branch) {
            return Ok(cached.state);
        }

        let reducer = self.registry.get(document_type)?;
        let ops = self
            .store
            .get_since(document_id, scope, branch, EMPTY_LOG_REVISION)
            .await?;
        let mut state = reducer.initial_state();
        let mut revision = EMPTY_LOG_REVISION;
        for op in &ops {
            state = reducer.reduce(&state, &op.action)?;
            revision = op.index;
        }
        if revision > EMPTY_LOG_REVISION {
            self.state_cache
                .put_state(document_id, scope, branch, revision, state.clone());
        }
        Ok(state)
    }

    pub async fn get_operations(
        &self,
        document_id: &str,
        scope: &str,
        branch: Option<&str>,
        since_revision: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Operation>> {
        self.check_alive(cancel)?;
        self.store
            .get_since(
                document_id,
                scope,
                branch.unwrap_or(MAIN_BRANCH),
                since_revision,
            )
            .await
    }

    pub async fn get_revisions(
        &self,
        document_id: &str,
        branch: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<DocumentRevisions> {
        self.check_alive(cancel)?;
        self.store
            .get_revisions(document_id, branch.unwrap_or(MAIN_BRANCH))
            .await
    }

    /// Cross-document index read: everything committed after `ordinal`.
    pub async fn find(
        &self,
        since_ordinal: u64,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<OperationWithContext>> {
        self.check_alive(cancel)?;
        self.store.get_since_ordinal(since_ordinal).await
    }

    pub fn get_job_status(
        &self,
        job_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<JobInfo> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(Error::Cancelled);
        }
        self.tracker
            .get(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()).into())
    }

    pub async fn wait_for_job(
        &self,
        job_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<JobInfo> {
        self.job_awaiter.wait_for_job(job_id, cancel).await
    }

    /// Resolves once the job's sync fan-out has fully succeeded or failed.
    pub async fn wait_for_sync(
        &self,
        job_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<SyncWaitOutcome> {
        self.sync_awaiter.wait_for_sync(job_id, cancel).await
    }

    pub fn sync_status(
        &self,
        document_id: &str,
    ) -> Option<SyncStatus> {
        self.status_tracker.get_status(document_id)
    }

    pub fn executor_status(&self) -> ManagerStatus {
        self.manager.get_status()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn registry(&self) -> Arc<DocumentModelRegistry> {
        self.registry.clone()
    }

    pub fn consistency(&self) -> Arc<ConsistencyTracker> {
        self.consistency.clone()
    }

    pub fn sync(&self) -> Option<Arc<SyncManager>> {
        self.sync_manager.get().cloned()
    }

    /// Graceful teardown: block the queue, drain outstanding jobs, stop
    /// the pool, the sync layer and the awaiters.
    pub async fn shutdown(&self) -> ShutdownStatus {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return ShutdownStatus { clean: true };
        }
        info!("reactor shutting down");

        if let Some(drained) = self.queue.block() {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(self.settings.executor.job_timeout_ms),
                drained,
            )
            .await;
        }

        self.manager.shutdown().await;

        let mut clean = true;
        if let Some(sync) = self.sync_manager.get() {
            clean = sync.shutdown().await.clean;
        }

        self.job_awaiter.shutdown();
        self.sync_awaiter.shutdown();

        info!("reactor shut down (clean: {})", clean);
        ShutdownStatus { clean }
    }

    /// Immediate teardown: rejects waiters and stops intake now; channel
    /// cleanup finishes in the background.
    pub fn kill(&self) -> ShutdownStatus {
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.queue.pause();
        self.manager.scale(0);
        self.job_awaiter.shutdown();
        self.sync_awaiter.shutdown();
        if let Some(sync) = self.sync_manager.get().cloned() {
            tokio::spawn(async move {
                sync.shutdown().await;
            });
        }
        ShutdownStatus { clean: false }
    }
}

impl OperationSink for Reactor {
    /// Inbound sync operations enter the same pipeline as local writes: a
    /// load job, serialized per document by the queue.
    fn load(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        operations: Vec<Operation>,
        source_remote: Option<String>,
    ) -> Result<JobInfo> {
        self.check_alive(None)?;
        self.submit(
            Job::load(document_id, scope, branch, operations, source_remote)
                .with_max_retries(self.settings.executor.max_retries),
        )
    }
}
