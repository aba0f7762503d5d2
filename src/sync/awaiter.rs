//! Sync awaiter: "all sync operations spawned by job X have succeeded or
//! failed", as a future. Driven by sync-operation status observers, no
//! polling; cancelable per waiter; shutdown rejects everything pending.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::Result;
use crate::SyncError;
use crate::SyncOperation;
use crate::SyncOperationStatus;

/// How a job's sync fan-out settled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncWaitOutcome {
    pub job_id: String,
    pub applied: usize,
    /// (sync op id, error message)
    pub failed: Vec<(String, String)>,
}

impl SyncWaitOutcome {
    pub fn is_fully_applied(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct JobSyncState {
    pending: HashSet<String>,
    applied: usize,
    failed: Vec<(String, String)>,
    waiters: Vec<oneshot::Sender<SyncWaitOutcome>>,
}

impl JobSyncState {
    fn outcome(
        &self,
        job_id: &str,
    ) -> SyncWaitOutcome {
        SyncWaitOutcome {
            job_id: job_id.to_string(),
            applied: self.applied,
            failed: self.failed.clone(),
        }
    }
}

#[derive(Default)]
pub struct SyncAwaiter {
    jobs: Arc<Mutex<HashMap<String, JobSyncState>>>,
    is_shutdown: AtomicBool,
}

impl SyncAwaiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tracks one sync operation under its job id. Must be called when the
    /// operation is created, before it can settle.
    pub fn register(
        &self,
        sync_op: &SyncOperation,
    ) {
        if sync_op.job_id().is_empty() || self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut jobs = self.jobs.lock();
            let state = jobs.entry(sync_op.job_id().to_string()).or_default();
            state.pending.insert(sync_op.id().to_string());
        }

        let jobs = self.jobs.clone();
        sync_op.on_status(move |op, _prev, next| {
            if !next.is_terminal() {
                return;
            }
            settle(&jobs, op, next);
        });

        // already terminal when handed to us
        let status = sync_op.status();
        if status.is_terminal() {
            settle(&self.jobs, sync_op, status);
        }
    }

    /// Resolves once every registered sync operation of the job is
    /// Applied or Error. A job with nothing pending resolves immediately.
    pub async fn wait_for_sync(
        &self,
        job_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<SyncWaitOutcome> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::AwaiterShutdown.into());
        }

        let rx = {
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(job_id) {
                None => {
                    return Ok(SyncWaitOutcome {
                        job_id: job_id.to_string(),
                        ..Default::default()
                    })
                }
                Some(state) if state.pending.is_empty() => {
                    return Ok(state.outcome(job_id));
                }
                Some(state) => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push(tx);
                    rx
                }
            }
        };

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = rx => result.map_err(|_| SyncError::AwaiterShutdown.into()),
                }
            }
            None => rx.await.map_err(|_| SyncError::AwaiterShutdown.into()),
        }
    }

    /// Rejects every outstanding waiter.
    pub fn shutdown(&self) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        let mut jobs = self.jobs.lock();
        for state in jobs.values_mut() {
            state.waiters.clear();
        }
    }
}

/// Books one terminal sync operation against its job, resolving waiters
/// when the job's last pending unit settles.
fn settle(
    jobs: &Mutex<HashMap<String, JobSyncState>>,
    sync_op: &SyncOperation,
    status: SyncOperationStatus,
) {
    let resolved: Option<(Vec<oneshot::Sender<SyncWaitOutcome>>, SyncWaitOutcome)> = {
        let mut jobs = jobs.lock();
        let Some(state) = jobs.get_mut(sync_op.job_id()) else {
            return;
        };
        if !state.pending.remove(sync_op.id()) {
            return;
        }
        match status {
            SyncOperationStatus::Applied => state.applied += 1,
            SyncOperationStatus::Error => state.failed.push((
                sync_op.id().to_string(),
                sync_op.error().unwrap_or_default(),
            )),
            _ => {}
        }
        if state.pending.is_empty() {
            let outcome = state.outcome(sync_op.job_id());
            Some((std::mem::take(&mut state.waiters), outcome))
        } else {
            None
        }
    };

    if let Some((waiters, outcome)) = resolved {
        debug!(
            "sync fan-out for job {} settled: {} applied, {} failed",
            outcome.job_id,
            outcome.applied,
            outcome.failed.len()
        );
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}
