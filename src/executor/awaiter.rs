//! Job awaiter: turns "wait until job X is terminal" into a future.
//!
//! Waiters register a one-shot channel per job id and are woken by
//! JobCompleted / JobFailed events from the bus. One shared fallback timer
//! batch-checks every pending id against the tracker each tick, so a missed
//! event cannot strand a waiter and a thousand waiters still cost one
//! timer. Cancellation releases only the cancelled waiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::EventBus;
use crate::ExecutorError;
use crate::JobInfo;
use crate::JobTracker;
use crate::ReactorEvent;
use crate::Result;

type Waiter = oneshot::Sender<JobInfo>;

struct AwaiterInner {
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
    tracker: Arc<JobTracker>,
    shutdown: CancellationToken,
}

impl AwaiterInner {
    /// Resolves every waiter of `job_id` if the job is terminal.
    fn try_resolve(
        &self,
        job_id: &str,
    ) {
        let Some(info) = self.tracker.get(job_id) else {
            return;
        };
        if !info.status.is_terminal() {
            return;
        }
        let waiters = self.waiters.lock().remove(job_id);
        if let Some(waiters) = waiters {
            debug!("resolving {} waiter(s) for job {}", waiters.len(), job_id);
            for waiter in waiters {
                let _ = waiter.send(info.clone());
            }
        }
    }

    /// One tick of the shared fallback timer: a single pass over all
    /// pending ids, one status check each, shared by every waiter on that
    /// id.
    fn poll_pending(&self) {
        let pending: Vec<String> = self.waiters.lock().keys().cloned().collect();
        for job_id in pending {
            self.try_resolve(&job_id);
        }
    }

    /// Drops every registered waiter. Their receivers resolve with a
    /// closed-channel error mapped to AwaiterShutdown.
    fn reject_all(&self) {
        let drained: Vec<Waiter> = self
            .waiters
            .lock()
            .drain()
            .flat_map(|(_, waiters)| waiters)
            .collect();
        debug!("rejecting {} outstanding waiter(s)", drained.len());
        drop(drained);
    }
}

pub struct JobAwaiter {
    inner: Arc<AwaiterInner>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JobAwaiter {
    pub fn new(
        event_bus: &EventBus,
        tracker: Arc<JobTracker>,
        poll_interval_ms: u64,
    ) -> Self {
        let inner = Arc::new(AwaiterInner {
            waiters: Mutex::new(HashMap::new()),
            tracker,
            shutdown: CancellationToken::new(),
        });

        let mut events = event_bus.subscribe();
        let task_inner = inner.clone();
        let task = tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_millis(poll_interval_ms.max(10)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_inner.shutdown.cancelled() => {
                        task_inner.reject_all();
                        return;
                    }

                    event = events.recv() => {
                        match event {
                            Some(ReactorEvent::JobCompleted { job_id, .. })
                            | Some(ReactorEvent::JobFailed { job_id, .. }) => {
                                task_inner.try_resolve(&job_id);
                            }
                            Some(_) => {}
                            None => {
                                // bus is gone; the fallback timer keeps serving
                            }
                        }
                    }

                    _ = tick.tick() => {
                        task_inner.poll_pending();
                    }
                }
            }
        });

        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// Resolves when the job's status becomes terminal. An already-terminal
    /// job resolves immediately. Cancelling the token rejects only this
    /// waiter; other waiters on the same id keep waiting.
    pub async fn wait_for_job(
        &self,
        job_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<JobInfo> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ExecutorError::AwaiterShutdown.into());
        }
        if let Some(info) = self.inner.tracker.get(job_id) {
            if info.status.is_terminal() {
                return Ok(info);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.inner
            .waiters
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push(tx);

        // the job may have settled between the check and the registration;
        // the next fallback tick would also catch this
        self.inner.try_resolve(job_id);

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = rx => result.map_err(|_| ExecutorError::AwaiterShutdown.into()),
                }
            }
            None => rx.await.map_err(|_| ExecutorError::AwaiterShutdown.into()),
        }
    }

    /// Synchronously rejects every outstanding waiter; used for process
    /// teardown.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.reject_all();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.waiters.lock().values().map(|w| w.len()).sum()
    }
}

impl Drop for JobAwaiter {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
