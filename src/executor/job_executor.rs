//! Job executor: applies a job's actions through the document-model
//! reducer and commits the resulting operations through the operation
//! store's expected-revision CAS.
//!
//! A revision mismatch means another writer got there first; the executor
//! refreshes its caches and retries with exponential backoff, bounded by
//! the job's retry budget. Every other error is terminal for the job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;

use crate::constants::ACTION_CREATE_DOCUMENT;
use crate::constants::ACTION_DELETE_DOCUMENT;
use crate::constants::ACTION_UPGRADE_DOCUMENT;
use crate::constants::DOCUMENT_SCOPE;
use crate::constants::EMPTY_LOG_REVISION;
use crate::remove_existing_operations;
use crate::utils::backoff_delay;
use crate::Action;
use crate::BackoffPolicy;
use crate::DocumentMetaCache;
use crate::DocumentModelRegistry;
use crate::DocumentReducer;
use crate::Error;
use crate::EventBus;
use crate::ExecutorError;
use crate::Job;
use crate::JobKind;
use crate::Operation;
use crate::OperationStore;
use crate::OperationWithContext;
use crate::ReactorEvent;
use crate::Result;
use crate::StateCache;
use crate::StorageError;

/// What one executed job committed.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub operations: Vec<OperationWithContext>,
    pub duration_ms: u64,
}

#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute_job(
        &self,
        job: &Job,
    ) -> Result<JobOutcome>;
}

/// Shared construction recipe so the manager can stamp out executors.
pub trait JobExecutorFactory: Send + Sync + 'static {
    fn instance(&self) -> Arc<dyn JobExecutor>;
}

pub struct DocumentJobExecutor {
    store: Arc<dyn OperationStore>,
    registry: Arc<DocumentModelRegistry>,
    meta_cache: Arc<DocumentMetaCache>,
    state_cache: Arc<StateCache>,
    event_bus: Arc<EventBus>,
    commit_policy: BackoffPolicy,
}

impl DocumentJobExecutor {
    pub fn new(
        store: Arc<dyn OperationStore>,
        registry: Arc<DocumentModelRegistry>,
        meta_cache: Arc<DocumentMetaCache>,
        state_cache: Arc<StateCache>,
        event_bus: Arc<EventBus>,
        commit_policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            meta_cache,
            state_cache,
            event_bus,
            commit_policy,
        }
    }

    fn is_document_scope_action(action: &Action) -> bool {
        matches!(
            action.action_type.as_str(),
            ACTION_CREATE_DOCUMENT
                | ACTION_UPGRADE_DOCUMENT
                | ACTION_DELETE_DOCUMENT
                | crate::constants::ACTION_ADD_RELATIONSHIP
                | crate::constants::ACTION_REMOVE_RELATIONSHIP
        )
    }

    /// Conflict gate for the commit retry loops: a concurrency conflict
    /// with budget left refreshes the caches and backs off; a conflict
    /// without budget becomes RetriesExhausted; anything else passes
    /// through as-is.
    async fn backoff_on_conflict(
        &self,
        job: &Job,
        attempt: u32,
        budget: u32,
        e: Error,
    ) -> Result<()> {
        if !e.is_concurrency_conflict() {
            return Err(e);
        }
        if attempt + 1 >= budget {
            return Err(ExecutorError::RetriesExhausted {
                job_id: job.id.clone(),
                attempts: attempt + 1,
            }
            .into());
        }

        warn!(
            "job {} hit a commit conflict (attempt {}): {}",
            job.id, attempt, e
        );
        self.state_cache
            .invalidate(&job.document_id, &job.scope, &job.branch);
        self.meta_cache
            .invalidate(&job.document_id, Some(&job.branch));
        sleep(backoff_delay(
            attempt,
            self.commit_policy.base_delay_ms,
            self.commit_policy.max_delay_ms,
        ))
        .await;
        Ok(())
    }

    /// Last committed document-scope index, -1 for a document that does
    /// not exist yet. The meta revision counts operations, so the prior
    /// index the CAS expects is one less.
    async fn document_log_index(
        &self,
        document_id: &str,
        branch: &str,
    ) -> Result<i64> {
        match self
            .meta_cache
            .get_document_meta(document_id, branch, None)
            .await
        {
            Ok(meta) => Ok(meta.document_scope_revision - 1),
            Err(Error::Storage(StorageError::DocumentNotFound { .. })) => Ok(EMPTY_LOG_REVISION),
            Err(e) => Err(e),
        }
    }

    /// Lifecycle actions fold straight over document-scope state; no
    /// registered reducer is involved.
    async fn execute_document_action(
        &self,
        job: &Job,
        action: &Action,
    ) -> Result<Vec<OperationWithContext>> {
        let document_type = if action.action_type == ACTION_CREATE_DOCUMENT {
            action.input["model"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        } else {
            self.meta_cache
                .get_document_meta(&job.document_id, &job.branch, None)
                .await?
                .document_type
        };

        let budget = job.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            match self.try_document_action(job, action, &document_type).await {
                Ok(ops) => return Ok(ops),
                Err(e) => {
                    self.backoff_on_conflict(job, attempt, budget, e).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_document_action(
        &self,
        job: &Job,
        action: &Action,
        document_type: &str,
    ) -> Result<Vec<OperationWithContext>> {
        let revision = self
            .document_log_index(&job.document_id, &job.branch)
            .await?;
        if action.action_type == ACTION_CREATE_DOCUMENT && revision > EMPTY_LOG_REVISION {
            return Err(StorageError::InvalidAppend(format!(
                "document {} already exists on branch {}",
                job.document_id, job.branch
            ))
            .into());
        }
        let op = Operation::from_action(
            action.clone(),
            revision + 1,
            0,
            &serde_json::json!({ "type": action.action_type }),
        );

        let applied = self
            .store
            .apply(
                &job.document_id,
                document_type,
                DOCUMENT_SCOPE,
                &job.branch,
                revision,
                Box::new(move |txn| {
                    txn.add_operations([op]);
                    Ok(())
                }),
            )
            .await?;

        self.meta_cache
            .invalidate(&job.document_id, Some(&job.branch));
        Ok(applied.operations)
    }

    /// Everything else goes through the registered reducer against the
    /// scope's current state.
    async fn execute_regular_action(
        &self,
        job: &Job,
        action: &Action,
    ) -> Result<Vec<OperationWithContext>> {
        let meta = self
            .meta_cache
            .get_document_meta(&job.document_id, &job.branch, None)
            .await?;
        if meta.state.is_deleted {
            return Err(ExecutorError::DocumentDeleted {
                document_id: job.document_id.clone(),
                deleted_at_utc_ms: meta.state.deleted_at_utc_ms.clone().unwrap_or_default(),
            }
            .into());
        }

        let reducer = self.registry.get(&meta.document_type)?;

        let budget = job.max_retries.max(1);
        let mut attempt = 0u32;
        loop {
            match self
                .try_regular_action(job, action, &meta.document_type, reducer.as_ref())
                .await
            {
                Ok(ops) => return Ok(ops),
                Err(e) => {
                    self.backoff_on_conflict(job, attempt, budget, e).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn try_regular_action(
        &self,
        job: &Job,
        action: &Action,
        document_type: &str,
        reducer: &dyn DocumentReducer,
    ) -> Result<Vec<OperationWithContext>> {
        let (revision, state) = self.scope_state(job, reducer).await?;

        let next_state = reducer.reduce(&state, action).map_err(|e| {
            Error::from(ExecutorError::ReducerFailed {
                action_type: action.action_type.clone(),
                document_id: job.document_id.clone(),
                reason: e.to_string(),
            })
        })?;

        let op = Operation::from_action(action.clone(), revision + 1, 0, &next_state);
        let applied = self
            .store
            .apply(
                &job.document_id,
                document_type,
                &job.scope,
                &job.branch,
                revision,
                Box::new({
                    let op = op.clone();
                    move |txn| {
                        txn.add_operations([op]);
                        Ok(())
                    }
                }),
            )
            .await?;

        self.state_cache.put_state(
            &job.document_id,
            &job.scope,
            &job.branch,
            revision + 1,
            next_state,
        );
        Ok(applied.operations)
    }

    /// Cached scope state at its pinned revision, or a replay of the log
    /// through the reducer on miss.
    async fn scope_state(
        &self,
        job: &Job,
        reducer: &dyn DocumentReducer,
    ) -> Result<(i64, serde_json::Value)> {
        if let Some(cached) = self
            .state_cache
            .get_state(&job.document_id, &job.scope, &job.branch)
        {
            return Ok((cached.revision, cached.state));
        }

        let ops = self
            .store
            .get_since(&job.document_id, &job.scope, &job.branch, EMPTY_LOG_REVISION)
            .await?;
        let mut state = reducer.initial_state();
        let mut revision = EMPTY_LOG_REVISION;
        for op in &ops {
            state = reducer.reduce(&state, &op.action)?;
            revision = op.index;
        }
        Ok((revision, state))
    }

    /// Replays operations received from a remote: dedupe against history by
    /// (index, hash), re-anchor the survivors at the end of the local log,
    /// and append them in one transaction. Operation ids are preserved so
    /// the duplicate check keeps idempotency across transport retries.
    async fn execute_load(
        &self,
        job: &Job,
    ) -> Result<Vec<OperationWithContext>> {
        let document_type = self
            .meta_cache
            .get_document_meta(&job.document_id, &job.branch, None)
            .await
            .map(|m| m.document_type)
            .unwrap_or_else(|_| {
                job.operations
                    .iter()
                    .find(|op| op.action.action_type == ACTION_CREATE_DOCUMENT)
                    .and_then(|op| op.action.input["model"].as_str())
                    .unwrap_or_default()
                    .to_string()
            });

        let budget = job.max_retries.max(1);
        let mut attempt = 0u32;
        let applied = loop {
            match self.try_load(job, &document_type).await {
                Ok(ops) => break ops,
                Err(e) => {
                    self.backoff_on_conflict(job, attempt, budget, e).await?;
                    attempt += 1;
                }
            }
        };

        self.state_cache
            .invalidate(&job.document_id, &job.scope, &job.branch);
        if job.scope == DOCUMENT_SCOPE {
            self.meta_cache
                .invalidate(&job.document_id, Some(&job.branch));
        }

        Ok(applied)
    }

    async fn try_load(
        &self,
        job: &Job,
        document_type: &str,
    ) -> Result<Vec<OperationWithContext>> {
        let history = self
            .store
            .get_since(&job.document_id, &job.scope, &job.branch, EMPTY_LOG_REVISION)
            .await?;
        let revision = history
            .last()
            .map(|op| op.index)
            .unwrap_or(EMPTY_LOG_REVISION);

        let mut fresh = remove_existing_operations(&job.operations, &history);
        let seen: HashSet<&str> = history.iter().map(|op| op.id.as_str()).collect();
        fresh.retain(|op| !seen.contains(op.id.as_str()));

        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        fresh.sort_by(|a, b| {
            let ta = a.timestamp_utc_ms.parse::<u64>().unwrap_or(0);
            let tb = b.timestamp_utc_ms.parse::<u64>().unwrap_or(0);
            ta.cmp(&tb).then(a.index.cmp(&b.index))
        });
        let reanchored: Vec<Operation> = fresh
            .into_iter()
            .enumerate()
            .map(|(i, mut op)| {
                op.index = revision + 1 + i as i64;
                op
            })
            .collect();

        let applied = self
            .store
            .apply(
                &job.document_id,
                document_type,
                &job.scope,
                &job.branch,
                revision,
                Box::new(move |txn| {
                    txn.add_operations(reanchored);
                    Ok(())
                }),
            )
            .await?;
        Ok(applied.operations)
    }
}

#[async_trait]
impl JobExecutor for DocumentJobExecutor {
    async fn execute_job(
        &self,
        job: &Job,
    ) -> Result<JobOutcome> {
        let started = Instant::now();
        let mut operations = Vec::new();

        match job.kind {
            JobKind::Mutate => {
                for action in &job.actions {
                    let committed = if Self::is_document_scope_action(action) {
                        self.execute_document_action(job, action).await?
                    } else {
                        self.execute_regular_action(job, action).await?
                    };
                    operations.extend(committed);
                }
            }
            JobKind::Load => {
                operations = self.execute_load(job).await?;
            }
        }

        if !operations.is_empty() {
            self.event_bus.emit(ReactorEvent::OperationsWritten {
                job_id: Some(job.id.clone()),
                source_remote: job.source_remote.clone(),
                operations: Arc::new(operations.clone()),
            });
        }

        debug!(
            "job {} committed {} operation(s) in {:?}",
            job.id,
            operations.len(),
            started.elapsed()
        );

        Ok(JobOutcome {
            operations,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Factory producing executors that share the same stores and caches.
pub struct DocumentJobExecutorFactory {
    store: Arc<dyn OperationStore>,
    registry: Arc<DocumentModelRegistry>,
    meta_cache: Arc<DocumentMetaCache>,
    state_cache: Arc<StateCache>,
    event_bus: Arc<EventBus>,
    commit_policy: BackoffPolicy,
}

impl DocumentJobExecutorFactory {
    pub fn new(
        store: Arc<dyn OperationStore>,
        registry: Arc<DocumentModelRegistry>,
        meta_cache: Arc<DocumentMetaCache>,
        state_cache: Arc<StateCache>,
        event_bus: Arc<EventBus>,
        commit_policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            meta_cache,
            state_cache,
            event_bus,
            commit_policy,
        }
    }
}

impl JobExecutorFactory for DocumentJobExecutorFactory {
    fn instance(&self) -> Arc<dyn JobExecutor> {
        Arc::new(DocumentJobExecutor::new(
            self.store.clone(),
            self.registry.clone(),
            self.meta_cache.clone(),
            self.state_cache.clone(),
            self.event_bus.clone(),
            self.commit_policy,
        ))
    }
}
