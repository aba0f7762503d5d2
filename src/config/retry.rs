use serde::Deserialize;

/// Basic retry policy template
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (minimum 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Divide strategies by business domain
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicies {
    // Optimistic-commit strategy (expected-revision CAS conflicts)
    #[serde(default)]
    pub commit: BackoffPolicy,

    // Outbound sync transport strategy (pushSyncEnvelopes)
    #[serde(default)]
    pub push: BackoffPolicy,

    // Inbound sync transport strategy (pollSyncEnvelopes)
    #[serde(default)]
    pub poll: BackoffPolicy,
}

// Default value implementation
impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            commit: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 5000,
                base_delay_ms: 100,
                max_delay_ms: 5000,
            },
            push: BackoffPolicy {
                max_retries: 5,
                timeout_ms: 30000,
                base_delay_ms: 1000,
                max_delay_ms: 300000,
            },
            poll: BackoffPolicy {
                max_retries: 5,
                timeout_ms: 30000,
                base_delay_ms: 1000,
                max_delay_ms: 300000,
            },
        }
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    5000
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
