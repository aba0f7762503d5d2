use serde::Deserialize;

/// Job execution pool parameters
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ExecutorConfig {
    /// Number of executor instances the manager starts with
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Default per-job retry budget for optimistic-commit conflicts
    #[serde(default = "default_job_max_retries")]
    pub max_retries: u32,

    /// Hard ceiling on a single job execution
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,

    /// Shared awaiter fallback tick. One timer batch-checks every pending
    /// job id, so this is a safety net, not the primary wake path.
    #[serde(default = "default_awaiter_poll_interval_ms")]
    pub awaiter_poll_interval_ms: u64,

    /// Idle executor wake interval when no JobAvailable event arrives
    #[serde(default = "default_worker_idle_interval_ms")]
    pub worker_idle_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_job_max_retries(),
            job_timeout_ms: default_job_timeout_ms(),
            awaiter_poll_interval_ms: default_awaiter_poll_interval_ms(),
            worker_idle_interval_ms: default_worker_idle_interval_ms(),
        }
    }
}

/// Cache sizing
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CacheConfig {
    /// Max entries in the document meta cache before LRU eviction
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Max entries in the scope-state write cache before LRU eviction
    #[serde(default = "default_max_states")]
    pub max_states: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
            max_states: default_max_states(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_job_max_retries() -> u32 {
    3
}
fn default_job_timeout_ms() -> u64 {
    30000
}
fn default_awaiter_poll_interval_ms() -> u64 {
    250
}
fn default_worker_idle_interval_ms() -> u64 {
    100
}
fn default_max_documents() -> usize {
    1000
}
fn default_max_states() -> usize {
    500
}
