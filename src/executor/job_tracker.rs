//! Job status registry: Queued -> Active -> Completed | Failed.
//! Transitions out of a terminal state are silently refused, so late
//! bookkeeping can never resurrect a finished job.

use dashmap::DashMap;

use crate::ErrorInfo;
use crate::JobInfo;
use crate::JobResultInfo;
use crate::JobStatus;

#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: DashMap<String, JobInfo>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_queued(
        &self,
        job_id: &str,
    ) -> JobInfo {
        let info = JobInfo::queued(job_id);
        self.jobs.insert(job_id.to_string(), info.clone());
        info
    }

    pub fn set_active(
        &self,
        job_id: &str,
    ) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            if entry.status == JobStatus::Queued {
                entry.status = JobStatus::Active;
            }
        }
    }

    pub fn complete(
        &self,
        job_id: &str,
        result: JobResultInfo,
    ) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            if !entry.status.is_terminal() {
                entry.status = JobStatus::Completed;
                entry.result = Some(result);
            }
        }
    }

    pub fn fail(
        &self,
        job_id: &str,
        error: ErrorInfo,
    ) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            if !entry.status.is_terminal() {
                entry.status = JobStatus::Failed;
                entry.error = Some(error);
            }
        }
    }

    pub fn get(
        &self,
        job_id: &str,
    ) -> Option<JobInfo> {
        self.jobs.get(job_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
