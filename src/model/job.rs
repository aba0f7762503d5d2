//! Jobs: units of queued work. A job is owned by the queue until dequeued,
//! then by an executor until terminal.

use serde::Deserialize;
use serde::Serialize;

use super::Action;
use super::Operation;
use crate::utils::timestamp_utc_ms_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Apply new actions through the reducer
    Mutate,
    /// Replay operations received from a remote reactor
    Load,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub scope: String,
    pub branch: String,
    pub kind: JobKind,
    /// Mutate jobs: actions to reduce
    pub actions: Vec<Action>,
    /// Load jobs: remote operations to replay
    pub operations: Vec<Operation>,
    /// Job ids this job must wait for before dequeue
    pub queue_hint: Vec<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub created_at_utc_ms: String,
    /// Set on load jobs so the originating remote is not echoed back
    pub source_remote: Option<String>,
    pub last_error: Option<ErrorInfo>,
    pub error_history: Vec<ErrorInfo>,
}

impl Job {
    pub fn mutate(
        document_id: impl Into<String>,
        scope: impl Into<String>,
        branch: impl Into<String>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(),
            document_id: document_id.into(),
            scope: scope.into(),
            branch: branch.into(),
            kind: JobKind::Mutate,
            actions,
            operations: Vec::new(),
            queue_hint: Vec::new(),
            max_retries: 3,
            retry_count: 0,
            created_at_utc_ms: timestamp_utc_ms_string(),
            source_remote: None,
            last_error: None,
            error_history: Vec::new(),
        }
    }

    pub fn load(
        document_id: impl Into<String>,
        scope: impl Into<String>,
        branch: impl Into<String>,
        operations: Vec<Operation>,
        source_remote: Option<String>,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(),
            document_id: document_id.into(),
            scope: scope.into(),
            branch: branch.into(),
            kind: JobKind::Load,
            actions: Vec::new(),
            operations,
            queue_hint: Vec::new(),
            max_retries: 3,
            retry_count: 0,
            created_at_utc_ms: timestamp_utc_ms_string(),
            source_remote,
            last_error: None,
            error_history: Vec::new(),
        }
    }

    pub fn with_queue_hint(
        mut self,
        depends_on: Vec<String>,
    ) -> Self {
        self.queue_hint = depends_on;
        self
    }

    pub fn with_max_retries(
        mut self,
        max_retries: u32,
    ) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// A job with nothing to apply is invalid and rejected at submission.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.operations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&crate::Error> for ErrorInfo {
    fn from(e: &crate::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Terminal-once-set state machine:
/// Queued -> Active -> Completed | Failed. No transition leaves a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What a completed job produced: the committed operation ids and the final
/// revision of the touched scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultInfo {
    pub operation_ids: Vec<String>,
    pub revision: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub status: JobStatus,
    pub result: Option<JobResultInfo>,
    pub error: Option<ErrorInfo>,
}

impl JobInfo {
    pub fn queued(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            result: None,
            error: None,
        }
    }
}
