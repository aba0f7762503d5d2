//! Job executor manager: owns a pool of executor instances behind a shared
//! factory, scales it, pauses and resumes intake, and aggregates status
//! across the pool.
//!
//! Each worker is a task woken by JobAvailable events (with an idle tick as
//! a safety net) that drains the queue: claim, execute, settle. The queue's
//! per-document serialization means workers never contend on one log.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::ErrorInfo;
use crate::EventBus;
use crate::ExecutorConfig;
use crate::InMemoryJobQueue;
use crate::JobClaim;
use crate::JobExecutorFactory;
use crate::JobResultInfo;
use crate::JobTracker;
use crate::ReactorEvent;
use crate::Result;

/// Aggregated pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStatus {
    pub workers: usize,
    pub active: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub paused: bool,
}

struct WorkerHandle {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

pub struct JobExecutorManager {
    queue: Arc<InMemoryJobQueue>,
    factory: Arc<dyn JobExecutorFactory>,
    event_bus: Arc<EventBus>,
    tracker: Arc<JobTracker>,
    config: ExecutorConfig,
    workers: Mutex<Vec<WorkerHandle>>,
    active: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    paused: AtomicBool,
}

impl JobExecutorManager {
    pub fn new(
        queue: Arc<InMemoryJobQueue>,
        factory: Arc<dyn JobExecutorFactory>,
        event_bus: Arc<EventBus>,
        tracker: Arc<JobTracker>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            factory,
            event_bus,
            tracker,
            config,
            workers: Mutex::new(Vec::new()),
            active: Arc::new(AtomicU64::new(0)),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            paused: AtomicBool::new(false),
        }
    }

    /// Starts the configured number of workers.
    pub fn start(&self) {
        self.scale(self.config.workers);
    }

    /// Grows or shrinks the pool to `n` executor instances. Stopped workers
    /// finish their current job before exiting.
    pub fn scale(
        &self,
        n: usize,
    ) {
        let mut workers = self.workers.lock();

        while workers.len() > n {
            if let Some(worker) = workers.pop() {
                worker.cancel.cancel();
            }
        }

        while workers.len() < n {
            let cancel = CancellationToken::new();
            let handle = self.spawn_worker(workers.len(), cancel.clone());
            workers.push(WorkerHandle { cancel, handle });
        }

        info!("executor pool scaled to {} worker(s)", workers.len());
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let executor = self.factory.instance();
        let tracker = self.tracker.clone();
        let event_bus = self.event_bus.clone();
        let active = self.active.clone();
        let succeeded = self.succeeded.clone();
        let failed = self.failed.clone();
        let idle_interval = Duration::from_millis(self.config.worker_idle_interval_ms.max(10));
        let job_timeout = Duration::from_millis(self.config.job_timeout_ms.max(1));

        tokio::spawn(async move {
            let mut events = event_bus.subscribe();
            let mut idle = tokio::time::interval(idle_interval);
            idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            debug!("executor worker {} started", worker_id);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("executor worker {} stopping", worker_id);
                        return;
                    }

                    event = events.recv() => {
                        if let Some(ReactorEvent::JobAvailable { .. }) = event {
                            Self::drain(
                                &queue, executor.as_ref(), &tracker, &event_bus,
                                &active, &succeeded, &failed, job_timeout,
                            ).await;
                        }
                    }

                    _ = idle.tick() => {
                        Self::drain(
                            &queue, executor.as_ref(), &tracker, &event_bus,
                            &active, &succeeded, &failed, job_timeout,
                        ).await;
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn drain(
        queue: &Arc<InMemoryJobQueue>,
        executor: &dyn crate::JobExecutor,
        tracker: &JobTracker,
        event_bus: &EventBus,
        active: &AtomicU64,
        succeeded: &AtomicU64,
        failed: &AtomicU64,
        job_timeout: Duration,
    ) {
        loop {
            let claim = match queue.dequeue_next(None) {
                Ok(Some(claim)) => claim,
                Ok(None) => return,
                Err(e) => {
                    warn!("dequeue failed: {}", e);
                    return;
                }
            };

            Self::process(
                claim, executor, tracker, event_bus, active, succeeded, failed, job_timeout,
            )
            .await;

            crate::metrics::QUEUE_DEPTH_METRIC
                .with_label_values(&["total"])
                .set(queue.total_size() as f64);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        claim: JobClaim,
        executor: &dyn crate::JobExecutor,
        tracker: &JobTracker,
        event_bus: &EventBus,
        active: &AtomicU64,
        succeeded: &AtomicU64,
        failed: &AtomicU64,
        job_timeout: Duration,
    ) {
        let job_id = claim.job.id.clone();
        let kind_label = match claim.job.kind {
            crate::JobKind::Mutate => "mutate",
            crate::JobKind::Load => "load",
        };
        tracker.set_active(&job_id);
        active.fetch_add(1, Ordering::SeqCst);

        let result: Result<crate::JobOutcome> =
            match timeout(job_timeout, executor.execute_job(&claim.job)).await {
                Ok(result) => result,
                Err(_) => Err(crate::Error::Fatal(format!(
                    "Job {} timed out after {:?}",
                    job_id, job_timeout
                ))),
            };

        active.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(outcome) => {
                crate::metrics::JOB_DURATION_MS_METRIC
                    .with_label_values(&[kind_label])
                    .observe(outcome.duration_ms as f64);
                let revision = outcome
                    .operations
                    .last()
                    .map(|op| op.operation.index)
                    .unwrap_or(crate::constants::EMPTY_LOG_REVISION);
                let info = JobResultInfo {
                    operation_ids: outcome
                        .operations
                        .iter()
                        .map(|op| op.operation.id.clone())
                        .collect(),
                    revision,
                };
                tracker.complete(&job_id, info.clone());
                claim.complete();
                succeeded.fetch_add(1, Ordering::SeqCst);
                crate::metrics::JOBS_EXECUTED_TOTAL
                    .with_label_values(&["completed"])
                    .inc();

                // jobs enqueued outside the facade have no tracker entry
                let info = tracker.get(&job_id).unwrap_or(crate::JobInfo {
                    id: job_id.clone(),
                    status: crate::JobStatus::Completed,
                    result: Some(info),
                    error: None,
                });
                event_bus.emit(ReactorEvent::JobCompleted { job_id, info });
            }
            Err(e) => {
                let error = ErrorInfo::new(e.to_string());
                tracker.fail(&job_id, error.clone());
                claim.fail(error.clone());
                failed.fetch_add(1, Ordering::SeqCst);
                crate::metrics::JOBS_EXECUTED_TOTAL
                    .with_label_values(&["failed"])
                    .inc();

                warn!("job {} failed: {}", job_id, error.message);
                event_bus.emit(ReactorEvent::JobFailed { job_id, error });
            }
        }
    }

    /// Stops job intake without destroying executor state.
    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.queue.pause();
    }

    /// Re-enables intake; the queue re-announces pending jobs.
    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.queue.resume();
    }

    pub fn get_status(&self) -> ManagerStatus {
        ManagerStatus {
            workers: self.workers.lock().len(),
            active: self.active.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
        }
    }

    /// Cancels every worker and waits for them to wind down.
    pub async fn shutdown(&self) {
        let workers: Vec<WorkerHandle> = {
            let mut guard = self.workers.lock();
            guard.drain(..).collect()
        };
        for worker in &workers {
            worker.cancel.cancel();
        }
        futures::future::join_all(workers.into_iter().map(|w| w.handle)).await;
        info!("executor pool shut down");
    }
}
