//! One logical unit of cross-reactor synchronization: a batch of operations
//! for one document plus routing metadata, with a status state machine
//! observed synchronously by mailboxes, trackers and awaiters.
//!
//! TransportPending -> ExecutionPending -> Applied, or Error (terminal,
//! routed to dead-letter). Terminal states are sticky.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::OperationWithContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperationStatus {
    /// Not yet handed to the transport (outbound) or not yet pulled
    /// (inbound)
    TransportPending,
    /// Transported; waiting for the receiving reactor to apply it
    ExecutionPending,
    Applied,
    Error,
}

impl SyncOperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncOperationStatus::Applied | SyncOperationStatus::Error)
    }
}

type StatusObserver =
    Arc<dyn Fn(&SyncOperation, SyncOperationStatus, SyncOperationStatus) + Send + Sync>;

struct SyncOpState {
    status: SyncOperationStatus,
    error: Option<String>,
    observers: Vec<StatusObserver>,
}

struct SyncOpInner {
    id: String,
    job_id: String,
    remote_name: String,
    document_id: String,
    scopes: Vec<String>,
    branch: String,
    job_dependencies: Vec<String>,
    operations: Vec<OperationWithContext>,
    state: Mutex<SyncOpState>,
}

/// Cheaply cloneable handle; all clones share one status.
#[derive(Clone)]
pub struct SyncOperation {
    inner: Arc<SyncOpInner>,
}

impl SyncOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: impl Into<String>,
        remote_name: impl Into<String>,
        document_id: impl Into<String>,
        scopes: Vec<String>,
        branch: impl Into<String>,
        operations: Vec<OperationWithContext>,
        job_dependencies: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncOpInner {
                id: nanoid::nanoid!(),
                job_id: job_id.into(),
                remote_name: remote_name.into(),
                document_id: document_id.into(),
                scopes,
                branch: branch.into(),
                job_dependencies,
                operations,
                state: Mutex::new(SyncOpState {
                    status: SyncOperationStatus::TransportPending,
                    error: None,
                    observers: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn job_id(&self) -> &str {
        &self.inner.job_id
    }

    pub fn remote_name(&self) -> &str {
        &self.inner.remote_name
    }

    pub fn document_id(&self) -> &str {
        &self.inner.document_id
    }

    pub fn scopes(&self) -> &[String] {
        &self.inner.scopes
    }

    pub fn branch(&self) -> &str {
        &self.inner.branch
    }

    pub fn job_dependencies(&self) -> &[String] {
        &self.inner.job_dependencies
    }

    pub fn operations(&self) -> &[OperationWithContext] {
        &self.inner.operations
    }

    pub fn status(&self) -> SyncOperationStatus {
        self.inner.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    /// Highest global ordinal carried by this unit, 0 when ordinals are
    /// not assigned yet.
    pub fn ordinal(&self) -> u64 {
        self.inner
            .operations
            .iter()
            .map(|op| op.context.ordinal)
            .max()
            .unwrap_or(0)
    }

    /// Observers fire synchronously on every status transition, outside
    /// the status lock.
    pub fn on_status<F>(
        &self,
        observer: F,
    ) where
        F: Fn(&SyncOperation, SyncOperationStatus, SyncOperationStatus) + Send + Sync + 'static,
    {
        self.inner.state.lock().observers.push(Arc::new(observer));
    }

    pub fn transported(&self) {
        self.transition(SyncOperationStatus::ExecutionPending, None);
    }

    pub fn applied(&self) {
        self.transition(SyncOperationStatus::Applied, None);
    }

    pub fn failed(
        &self,
        message: impl Into<String>,
    ) {
        self.transition(SyncOperationStatus::Error, Some(message.into()));
    }

    fn transition(
        &self,
        next: SyncOperationStatus,
        error: Option<String>,
    ) {
        let (prev, observers) = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() || state.status == next {
                return;
            }
            let prev = state.status;
            state.status = next;
            if error.is_some() {
                state.error = error;
            }
            (prev, state.observers.clone())
        };

        trace!(
            "sync op {} ({}): {:?} -> {:?}",
            self.inner.id,
            self.inner.document_id,
            prev,
            next
        );
        for observer in observers {
            observer(self, prev, next);
        }
    }
}

impl std::fmt::Debug for SyncOperation {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SyncOperation")
            .field("id", &self.inner.id)
            .field("job_id", &self.inner.job_id)
            .field("remote_name", &self.inner.remote_name)
            .field("document_id", &self.inner.document_id)
            .field("branch", &self.inner.branch)
            .field("status", &self.status())
            .field("operations", &self.inner.operations.len())
            .finish()
    }
}
