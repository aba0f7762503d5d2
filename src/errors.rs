//! Reactor Engine Error Hierarchy
//!
//! Defines error types for the document engine, categorized by subsystem
//! and operational concern: storage conflicts, batch validation, transport,
//! listener aggregation and fatal conditions.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation store failures, including optimistic-concurrency conflicts
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Job queue and job-plan validation failures
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Job execution failures
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Synchronization subsystem failures
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A waiter was released by its cancellation token.
    /// Work already in flight is not affected.
    #[error("Operation aborted")]
    Cancelled,

    /// Unrecoverable failures requiring operator attention
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Concurrency conflicts are recoverable by retrying the job against the
    /// refreshed revision. Everything else is not.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::RevisionMismatch { .. })
                | Error::Storage(StorageError::DuplicateOperation(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Expected-revision CAS failed: another writer committed first
    #[error("Revision mismatch: expected {expected}, actual {actual}")]
    RevisionMismatch { expected: i64, actual: i64 },

    /// An operation with this id was already committed (idempotent retry protection)
    #[error("Duplicate operation: {0}")]
    DuplicateOperation(String),

    /// No operations exist for the requested (document, scope, branch)
    #[error("Document not found: {document_id} (scope: {scope}, branch: {branch})")]
    DocumentNotFound {
        document_id: String,
        scope: String,
        branch: String,
    },

    /// The document-scope log does not start with CREATE_DOCUMENT
    #[error("Malformed document log for {document_id}: {reason}")]
    MalformedDocumentLog { document_id: String, reason: String },

    /// The transaction handed back operations that do not continue the log
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// Serialization failures for persisted data
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Embedded database errors
    #[error(transparent)]
    Engine(#[from] Box<sled::Error>),

    /// Disk I/O failures during log operations
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue is blocked for draining and rejects new jobs
    #[error("Queue is blocked")]
    Blocked,

    #[error("Duplicate job plan key: {0}")]
    DuplicatePlanKey(String),

    #[error("Job '{key}' depends on unknown key '{depends_on}'")]
    MissingDependency { key: String, depends_on: String },

    /// Cycle members in discovery order
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Job '{0}' carries no actions")]
    EmptyJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No document model registered for type: {0}")]
    ReducerNotFound(String),

    #[error("Reducer failed for action '{action_type}' on {document_id}: {reason}")]
    ReducerFailed {
        action_type: String,
        document_id: String,
        reason: String,
    },

    #[error("Document {document_id} was deleted at {deleted_at_utc_ms}")]
    DocumentDeleted {
        document_id: String,
        deleted_at_utc_ms: String,
    },

    /// The reducer returned without producing a state transition
    #[error("No operation generated from action '{0}'")]
    NoOperationGenerated(String),

    /// Optimistic-commit retries exhausted
    #[error("Job {job_id} failed after {attempts} attempts")]
    RetriesExhausted { job_id: String, attempts: u32 },

    #[error("Job awaiter has shut down")]
    AwaiterShutdown,

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote with name '{0}' already exists")]
    RemoteExists(String),

    #[error("Remote with name '{0}' does not exist")]
    RemoteNotFound(String),

    #[error("Sync manager is shut down")]
    ManagerShutdown,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Mailbox(#[from] MailboxAggregateError),

    #[error("Sync awaiter has shut down")]
    AwaiterShutdown,
}

/// Which half of a channel produced a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSide {
    Inbox,
    Outbox,
}

impl std::fmt::Display for ChannelSide {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ChannelSide::Inbox => write!(f, "inbox"),
            ChannelSide::Outbox => write!(f, "outbox"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{side} transport failed: {reason}")]
    Transport { side: ChannelSide, reason: String },

    #[error("{side} transport retries exhausted after {attempts} attempts")]
    RetriesExhausted { side: ChannelSide, attempts: usize },

    /// The remote no longer knows this channel; it must be re-registered
    #[error("Channel not found: {0}")]
    NotFound(String),

    /// Malformed GraphQL response or reported GraphQL errors
    #[error("Sync protocol error: {0}")]
    Protocol(String),

    #[error("Channel is shut down")]
    Shutdown,
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Error::Sync(SyncError::Channel(e))
    }
}

/// Collects every callback failure from a single mailbox fan-out so one bad
/// listener cannot swallow delivery to the others. Callers must treat partial
/// delivery as "all candidates notified, errors reported after the fact".
#[derive(Debug, thiserror::Error)]
#[error("{} mailbox callback(s) failed, first: {}", .errors.len(), .errors.first().map(|e| e.to_string()).unwrap_or_default())]
pub struct MailboxAggregateError {
    pub errors: Vec<Error>,
}
