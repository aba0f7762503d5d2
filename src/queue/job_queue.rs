//! In-memory job queue.
//!
//! Jobs are organized per (document_id, scope, branch) for FIFO ordering,
//! with dependency-aware dequeue through `queue_hint` and serial execution
//! per document: at most one job of a document is active at a time, so
//! concurrent jobs on different documents proceed independently while one
//! log never sees two writers.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ErrorInfo;
use crate::EventBus;
use crate::Job;
use crate::JobPlanEntry;
use crate::QueueError;
use crate::ReactorEvent;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueueKey {
    document_id: String,
    scope: String,
    branch: String,
}

impl QueueKey {
    fn of(job: &Job) -> Self {
        Self {
            document_id: job.document_id.clone(),
            scope: job.scope.clone(),
            branch: job.branch.clone(),
        }
    }
}

#[derive(Default)]
struct QueueInner {
    queues: HashMap<QueueKey, VecDeque<Job>>,
    job_to_key: HashMap<String, QueueKey>,
    job_index: HashMap<String, Job>,
    /// document_id -> executing job ids
    executing_by_doc: HashMap<String, HashSet<String>>,
    job_to_doc: HashMap<String, String>,
    completed: HashSet<String>,
    blocked: bool,
    paused: bool,
    drained_notify: Option<oneshot::Sender<()>>,
}

impl QueueInner {
    fn dependencies_met(
        &self,
        job: &Job,
    ) -> bool {
        job.queue_hint
            .iter()
            .all(|dep| self.completed.contains(dep))
    }

    fn is_document_executing(
        &self,
        document_id: &str,
    ) -> bool {
        self.executing_by_doc
            .get(document_id)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    fn is_drained(&self) -> bool {
        let has_pending = self.queues.values().any(|q| !q.is_empty());
        let has_executing = self.executing_by_doc.values().any(|s| !s.is_empty());
        !has_pending && !has_executing
    }

    fn take_job(
        &mut self,
        key: &QueueKey,
        job_id: &str,
    ) -> Option<Job> {
        let queue = self.queues.get_mut(key)?;
        let pos = queue.iter().position(|j| j.id == job_id)?;
        let job = queue.remove(pos)?;
        if queue.is_empty() {
            self.queues.remove(key);
        }
        self.job_to_key.remove(job_id);
        // the job stays in job_index so a retry can find it
        self.executing_by_doc
            .entry(job.document_id.clone())
            .or_default()
            .insert(job.id.clone());
        self.job_to_doc
            .insert(job.id.clone(), job.document_id.clone());
        Some(job)
    }

    fn settle(
        &mut self,
        job_id: &str,
    ) {
        if let Some(doc) = self.job_to_doc.remove(job_id) {
            if let Some(set) = self.executing_by_doc.get_mut(&doc) {
                set.remove(job_id);
                if set.is_empty() {
                    self.executing_by_doc.remove(&doc);
                }
            }
        }
        self.job_index.remove(job_id);
        self.completed.insert(job_id.to_string());
    }
}

pub struct InMemoryJobQueue {
    inner: Mutex<QueueInner>,
    event_bus: Arc<EventBus>,
    // claims carry a strong handle back to the queue for settlement
    weak_self: std::sync::Weak<InMemoryJobQueue>,
}

impl InMemoryJobQueue {
    pub fn new(event_bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(QueueInner::default()),
            event_bus,
            weak_self: weak.clone(),
        })
    }

    fn strong_self(&self) -> Arc<InMemoryJobQueue> {
        self.weak_self.upgrade().expect("queue dropped while in use")
    }

    /// Appends the job to its (document_id, scope, branch) queue and
    /// announces it on the bus. Rejected while the queue is blocked.
    pub fn enqueue(
        &self,
        job: Job,
    ) -> Result<()> {
        if job.is_empty() {
            return Err(QueueError::EmptyJob(job.id).into());
        }

        {
            let mut inner = self.inner.lock();
            if inner.blocked {
                return Err(QueueError::Blocked.into());
            }
            let key = QueueKey::of(&job);
            inner.job_to_key.insert(job.id.clone(), key.clone());
            inner.job_index.insert(job.id.clone(), job.clone());
            inner.queues.entry(key).or_default().push_back(job.clone());
        }

        self.event_bus.emit(ReactorEvent::JobAvailable {
            document_id: job.document_id,
            scope: job.scope,
            branch: job.branch,
            job_id: job.id,
        });
        Ok(())
    }

    /// Validates a batch as a whole, then enqueues it in DFS-postorder so
    /// dependencies always precede their dependents. Plan keys are mapped
    /// to job ids for dependency-aware dequeue. Returns the job ids in
    /// enqueue order.
    pub fn enqueue_plan(
        &self,
        entries: Vec<JobPlanEntry>,
    ) -> Result<Vec<String>> {
        crate::validate_plan(&entries)?;
        let order = crate::topological_order(&entries)?;

        let key_to_job_id: HashMap<&str, String> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.job.id.clone()))
            .collect();

        let mut ids = Vec::with_capacity(entries.len());
        for idx in order {
            let entry = &entries[idx];
            let hints = entry
                .depends_on
                .iter()
                .filter_map(|k| key_to_job_id.get(k.as_str()).cloned())
                .collect();
            let job = entry.job.clone().with_queue_hint(hints);
            ids.push(job.id.clone());
            self.enqueue(job)?;
        }
        Ok(ids)
    }

    /// Removes and claims the next eligible job for the exact key,
    /// respecting `queue_hint` dependencies.
    pub fn dequeue(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<JobClaim>> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(crate::Error::Cancelled);
        }

        let key = QueueKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };

        let mut inner = self.inner.lock();
        let candidate = inner.queues.get(&key).and_then(|queue| {
            queue
                .iter()
                .find(|job| inner.dependencies_met(job))
                .map(|job| job.id.clone())
        });

        match candidate {
            Some(job_id) => {
                let job = inner.take_job(&key, &job_id).expect("job disappeared");
                Ok(Some(JobClaim {
                    job,
                    queue: self.strong_self(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Claims the next eligible job across all keys, skipping documents
    /// that already have an active job. Returns `None` while paused.
    pub fn dequeue_next(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<JobClaim>> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(crate::Error::Cancelled);
        }

        let mut inner = self.inner.lock();
        if inner.paused {
            return Ok(None);
        }

        let mut candidate = None;
        for (key, queue) in inner.queues.iter() {
            if queue.is_empty() {
                continue;
            }
            if let Some(job) = queue.iter().find(|job| inner.dependencies_met(job)) {
                if !inner.is_document_executing(&job.document_id) {
                    candidate = Some((key.clone(), job.id.clone()));
                    break;
                }
            }
        }

        match candidate {
            Some((key, job_id)) => {
                let job = inner.take_job(&key, &job_id).expect("job disappeared");
                Ok(Some(JobClaim {
                    job,
                    queue: self.strong_self(),
                }))
            }
            None => Ok(None),
        }
    }

    pub fn size(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> usize {
        let key = QueueKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };
        self.inner
            .lock()
            .queues
            .get(&key)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Outstanding depth across every queue, for backpressure decisions
    pub fn total_size(&self) -> usize {
        self.inner.lock().queues.values().map(|q| q.len()).sum()
    }

    pub fn has_jobs(&self) -> bool {
        self.inner.lock().queues.values().any(|q| !q.is_empty())
    }

    pub fn get_job(
        &self,
        job_id: &str,
    ) -> Option<Job> {
        self.inner.lock().job_index.get(job_id).cloned()
    }

    pub fn remove(
        &self,
        job_id: &str,
    ) -> bool {
        let mut inner = self.inner.lock();
        let Some(key) = inner.job_to_key.remove(job_id) else {
            return false;
        };
        inner.job_index.remove(job_id);
        let Some(queue) = inner.queues.get_mut(&key) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|j| j.id == job_id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            inner.queues.remove(&key);
        }
        true
    }

    pub fn clear(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) {
        let key = QueueKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.queues.remove(&key) {
            for job in queue {
                inner.job_to_key.remove(&job.id);
                inner.job_index.remove(&job.id);
            }
        }
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.queues.clear();
        inner.job_to_key.clear();
        inner.job_index.clear();
        inner.completed.clear();
    }

    /// Stops dequeue without rejecting enqueues
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Re-enables dequeue and re-announces the head of every non-empty
    /// queue so idle executors wake up.
    pub fn resume(&self) {
        let heads: Vec<Job> = {
            let mut inner = self.inner.lock();
            inner.paused = false;
            inner
                .queues
                .values()
                .filter_map(|q| q.front().cloned())
                .collect()
        };
        for job in heads {
            self.event_bus.emit(ReactorEvent::JobAvailable {
                document_id: job.document_id,
                scope: job.scope,
                branch: job.branch,
                job_id: job.id,
            });
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Blocks new enqueues for draining. Returns a receiver that fires when
    /// the last pending or executing job settles, or `None` when the queue
    /// is already drained.
    pub fn block(&self) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.inner.lock();
        inner.blocked = true;
        if inner.is_drained() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        inner.drained_notify = Some(tx);
        Some(rx)
    }

    pub fn unblock(&self) {
        let mut inner = self.inner.lock();
        inner.blocked = false;
        inner.drained_notify = None;
    }

    pub fn is_drained(&self) -> bool {
        self.inner.lock().is_drained()
    }

    fn settle_and_check_drained(
        &self,
        job_id: &str,
    ) {
        let notify = {
            let mut inner = self.inner.lock();
            inner.settle(job_id);
            if inner.is_drained() {
                inner.drained_notify.take()
            } else {
                None
            }
        };
        if let Some(tx) = notify {
            let _ = tx.send(());
        }
    }

    fn complete(
        &self,
        job_id: &str,
    ) {
        debug!("job {} completed", job_id);
        self.settle_and_check_drained(job_id);
    }

    fn fail(
        &self,
        job: &Job,
        error: ErrorInfo,
    ) {
        debug!("job {} failed: {}", job.id, error.message);
        {
            let mut inner = self.inner.lock();
            if let Some(stored) = inner.job_index.get_mut(&job.id) {
                stored.last_error = Some(error.clone());
                stored.error_history.push(error);
            }
        }
        self.settle_and_check_drained(&job.id);
    }

    fn retry(
        &self,
        mut job: Job,
        error: Option<ErrorInfo>,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(doc) = inner.job_to_doc.remove(&job.id) {
                if let Some(set) = inner.executing_by_doc.get_mut(&doc) {
                    set.remove(&job.id);
                    if set.is_empty() {
                        inner.executing_by_doc.remove(&doc);
                    }
                }
            }
            inner.job_index.remove(&job.id);
        }

        job.retry_count += 1;
        if let Some(error) = error {
            job.last_error = Some(error.clone());
            job.error_history.push(error);
        }
        self.enqueue(job)
    }
}

/// Exclusive claim on a dequeued job. The queue guarantees at most one
/// claim per job; the holder must settle it exactly once.
pub struct JobClaim {
    pub job: Job,
    queue: Arc<InMemoryJobQueue>,
}

impl JobClaim {
    pub fn complete(self) {
        self.queue.complete(&self.job.id);
    }

    pub fn fail(
        self,
        error: ErrorInfo,
    ) {
        self.queue.fail(&self.job, error);
    }

    /// Puts the job back with an incremented retry count
    pub fn retry(
        self,
        error: Option<ErrorInfo>,
    ) -> Result<()> {
        let Self { job, queue } = self;
        queue.retry(job, error)
    }
}
